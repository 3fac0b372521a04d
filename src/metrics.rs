//! Prometheus metrics for message streams.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Why a block could not be delivered. Used as the `reason` label of
/// `sse_write_errors_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// The reader is gone: a closed socket or a dropped response body.
    PeerGone,
    /// The sink's write timeout expired.
    Timeout,
    Other,
}

impl WriteFailure {
    pub fn of(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => WriteFailure::PeerGone,
            io::ErrorKind::TimedOut => WriteFailure::Timeout,
            _ => WriteFailure::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteFailure::PeerGone => "peer_gone",
            WriteFailure::Timeout => "timeout",
            WriteFailure::Other => "other",
        }
    }
}

static ACTIVE_STREAMS: AtomicI64 = AtomicI64::new(0);

/// Register metric descriptions.
pub fn init_metrics() {
    describe_counter!("sse_connections_total", "Total connections accepted");
    describe_gauge!("sse_active_connections", "Currently open connections");
    describe_counter!(
        "sse_request_errors_total",
        "Requests rejected before streaming started"
    );

    describe_gauge!("sse_active_streams", "Streams currently being driven");
    describe_counter!("sse_messages_sent_total", "Messages written and flushed");
    describe_counter!("sse_heartbeats_sent_total", "Keep-alive comments written");
    describe_counter!("sse_bytes_sent_total", "Bytes written to clients");
    describe_counter!("sse_write_errors_total", "Failed writes by reason");
    describe_counter!("sse_streams_finished_total", "Finished streams by outcome");
    describe_histogram!("sse_stream_duration_seconds", "Stream lifetime");
}

/// Start the Prometheus scrape endpoint.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // 100ms to ~27h, streams are long-lived.
    let duration_buckets: [f64; 14] = [
        0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 10800.0, 43200.0,
        100000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("sse_stream_duration_seconds".to_string()),
            &duration_buckets,
        )
        .map_err(|e| anyhow::anyhow!("Invalid histogram buckets: {}", e))?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

pub fn record_connection_accepted() {
    counter!("sse_connections_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    gauge!("sse_active_connections").set(count as f64);
}

pub fn record_request_error(status: u16) {
    counter!("sse_request_errors_total", "status" => status.to_string()).increment(1);
}

pub fn record_stream_start() {
    let current = ACTIVE_STREAMS.fetch_add(1, Ordering::Relaxed) + 1;
    gauge!("sse_active_streams").set(current as f64);
}

/// Record a finished stream with its outcome label.
pub fn record_stream_end(outcome: &'static str, duration: Duration) {
    let current = ACTIVE_STREAMS.fetch_sub(1, Ordering::Relaxed) - 1;
    gauge!("sse_active_streams").set(current as f64);
    counter!("sse_streams_finished_total", "outcome" => outcome).increment(1);
    histogram!("sse_stream_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_message_sent() {
    counter!("sse_messages_sent_total").increment(1);
}

pub fn record_heartbeat_sent() {
    counter!("sse_heartbeats_sent_total").increment(1);
}

pub fn record_bytes_sent(bytes: u64) {
    counter!("sse_bytes_sent_total").increment(bytes);
}

pub fn record_write_error(err: &io::Error) {
    let reason = WriteFailure::of(err);
    counter!("sse_write_errors_total", "reason" => reason.as_str()).increment(1);
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failure_labels() {
        let cases = [
            (io::ErrorKind::BrokenPipe, WriteFailure::PeerGone),
            (io::ErrorKind::ConnectionReset, WriteFailure::PeerGone),
            (io::ErrorKind::NotConnected, WriteFailure::PeerGone),
            (io::ErrorKind::TimedOut, WriteFailure::Timeout),
            (io::ErrorKind::InvalidData, WriteFailure::Other),
        ];
        for (kind, expected) in cases {
            assert_eq!(WriteFailure::of(&io::Error::from(kind)), expected);
        }
        assert_eq!(WriteFailure::PeerGone.as_str(), "peer_gone");
    }
}
