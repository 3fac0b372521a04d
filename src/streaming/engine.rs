//! The drive loop: pull a message, render it, write, flush, check the peer, repeat.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::Stdout;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::sink::{OutputSink, Transport};
use crate::error::Result;
use crate::format::{render_lines, FieldSet, WireBlock};
use crate::logging::{StreamLogger, TracingLogger};
use crate::metrics::{self, Timer};
use crate::producer::{IntoProducer, Producer, StreamItem};

/// Comment written while the producer is idle, when heartbeats are enabled.
pub const HEARTBEAT_COMMENT: &str = "keep-alive";

/// Outcome of writing one block and checking the peer afterwards.
#[derive(Debug)]
pub enum Delivery {
    Delivered,
    /// Written and flushed, but the peer has gone away since.
    Disconnected,
    WriteFailed(io::Error),
}

/// Why a stream stopped before its producer ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    OutputError,
    ConnectionClosed,
    ServerShutdown,
}

impl ShutdownCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownCause::OutputError => "output error",
            ShutdownCause::ConnectionClosed => "connection closed",
            ShutdownCause::ServerShutdown => "server shutdown",
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exhausted,
    Shutdown(ShutdownCause),
}

impl Termination {
    fn metric_label(&self) -> &'static str {
        match self {
            Termination::Exhausted => "exhausted",
            Termination::Shutdown(ShutdownCause::OutputError) => "output_error",
            Termination::Shutdown(ShutdownCause::ConnectionClosed) => "connection_closed",
            Termination::Shutdown(ShutdownCause::ServerShutdown) => "server_shutdown",
        }
    }
}

/// Lifecycle of a single `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No producer obtained yet.
    Idle,
    Running,
    /// A shutdown cause was detected; no further pulls.
    Draining,
    /// The producer reported no more items.
    Exhausted,
    Stopped,
}

/// Counters for one finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub termination: Termination,
    pub messages_sent: u64,
    pub heartbeats_sent: u64,
    pub bytes_written: u64,
}

enum Pulled {
    Item(StreamItem),
    Exhausted,
    Interrupted(ShutdownCause),
}

/// Drives one producer into one output sink.
pub struct EventStream<T> {
    sink: OutputSink<T>,
    logger: Arc<dyn StreamLogger>,
    heartbeat_interval: Option<Duration>,
    shutdown: Option<watch::Receiver<bool>>,
    state: StreamState,
    messages_sent: u64,
    heartbeats_sent: u64,
}

impl EventStream<Stdout> {
    /// Stream to process standard output; the sink is closed by [`EventStream::close`].
    pub fn stdout() -> Self {
        Self::from_sink(OutputSink::stdout())
    }
}

impl<T: Transport> EventStream<T> {
    /// Stream into a caller-owned transport.
    pub fn new(transport: T) -> Self {
        Self::from_sink(OutputSink::new(transport))
    }

    pub fn from_sink(sink: OutputSink<T>) -> Self {
        Self {
            sink,
            logger: Arc::new(TracingLogger),
            heartbeat_interval: None,
            shutdown: None,
            state: StreamState::Idle,
            messages_sent: 0,
            heartbeats_sent: 0,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn StreamLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Write a keep-alive comment whenever the producer stays silent for `interval`.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    /// Stop between messages once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn sink(&self) -> &OutputSink<T> {
        &self.sink
    }

    pub fn into_sink(self) -> OutputSink<T> {
        self.sink
    }

    /// Release the sink, shutting it down if the stream opened it.
    pub async fn close(self) -> io::Result<()> {
        self.sink.close().await
    }

    /// Run a producer to completion or until a shutdown cause is detected.
    ///
    /// Disconnects and write failures end the run normally and are reported in the
    /// summary. Producer contract violations and formatting errors are returned as
    /// errors; the offending message is never partially written.
    pub async fn run<F, P>(&mut self, factory: F) -> Result<RunSummary>
    where
        F: FnOnce() -> P,
        P: IntoProducer,
    {
        self.state = StreamState::Idle;
        self.messages_sent = 0;
        self.heartbeats_sent = 0;
        let bytes_before = self.sink.bytes_written();

        let mut producer = factory().into_producer()?;

        self.state = StreamState::Running;
        metrics::record_stream_start();
        let timer = Timer::new();

        let result = self.drive(&mut producer).await;

        self.state = StreamState::Stopped;
        let outcome = match &result {
            Ok(termination) => termination.metric_label(),
            Err(_) => "error",
        };
        metrics::record_stream_end(outcome, timer.elapsed());

        result.map(|termination| RunSummary {
            termination,
            messages_sent: self.messages_sent,
            heartbeats_sent: self.heartbeats_sent,
            bytes_written: self.sink.bytes_written() - bytes_before,
        })
    }

    async fn drive(&mut self, producer: &mut Producer) -> Result<Termination> {
        let heartbeat = render_lines(&FieldSet::comment(HEARTBEAT_COMMENT))?;

        let cause = loop {
            let item = match self.pull(producer, &heartbeat).await {
                Pulled::Item(item) => item,
                Pulled::Exhausted => {
                    self.state = StreamState::Exhausted;
                    self.logger.debug("Producer exhausted, closing stream.");
                    return Ok(Termination::Exhausted);
                }
                Pulled::Interrupted(cause) => break cause,
            };

            let fields = item.into_field_set()?;
            let block = render_lines(&fields)?;

            match self.deliver(&block).await {
                Delivery::Delivered => {
                    self.messages_sent += 1;
                    metrics::record_message_sent();
                }
                Delivery::Disconnected => {
                    self.messages_sent += 1;
                    metrics::record_message_sent();
                    break ShutdownCause::ConnectionClosed;
                }
                Delivery::WriteFailed(e) => {
                    metrics::record_write_error(&e);
                    break ShutdownCause::OutputError;
                }
            }
        };

        self.state = StreamState::Draining;
        self.logger
            .notice(&format!("Shutdown signal received. Cause: {}", cause));

        Ok(Termination::Shutdown(cause))
    }

    /// Wait for the next item. Heartbeats and the shutdown signal are serviced while
    /// the producer is pending; the pending pull itself is never restarted.
    async fn pull(&mut self, producer: &mut Producer, heartbeat: &WireBlock) -> Pulled {
        let mut next = producer.next();
        // An interval too large to schedule means no heartbeat at all.
        let mut ticker = self.heartbeat_interval.and_then(|d| {
            let start = Instant::now().checked_add(d)?;
            let mut interval = tokio::time::interval_at(start, d);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        });

        loop {
            tokio::select! {
                biased;

                _ = shutdown_signaled(&mut self.shutdown) => {
                    return Pulled::Interrupted(ShutdownCause::ServerShutdown);
                }

                item = &mut next => {
                    return match item {
                        Some(item) => Pulled::Item(item),
                        None => Pulled::Exhausted,
                    };
                }

                _ = next_tick(&mut ticker) => {
                    match self.deliver(heartbeat).await {
                        Delivery::Delivered => {
                            self.heartbeats_sent += 1;
                            metrics::record_heartbeat_sent();
                        }
                        Delivery::Disconnected => {
                            return Pulled::Interrupted(ShutdownCause::ConnectionClosed);
                        }
                        Delivery::WriteFailed(e) => {
                            metrics::record_write_error(&e);
                            return Pulled::Interrupted(ShutdownCause::OutputError);
                        }
                    }
                }
            }
        }
    }

    /// Write every line, log, flush, then check whether the peer is still there.
    async fn deliver(&mut self, block: &WireBlock) -> Delivery {
        for line in block.line_bytes() {
            if let Err(e) = self.sink.write(&line).await {
                return Delivery::WriteFailed(e);
            }
        }

        self.logger
            .debug(&format!("New output received. Output: {:?}", block.lines()));

        if let Err(e) = self.sink.flush().await {
            return Delivery::WriteFailed(e);
        }

        if self.sink.peer_closed() {
            return Delivery::Disconnected;
        }

        Delivery::Delivered
    }
}

async fn shutdown_signaled(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };

    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without signaling; nothing can stop us from this side now.
            return std::future::pending().await;
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
