//! Router for the demo host: a single GET route streaming the demo producer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use super::body::{self, ChannelTransport};
use super::panic_message;
use crate::config::Config;
use crate::error::{ServerError, StreamError};
use crate::format::RECOMMENDED_HEADERS;
use crate::logging::{LogCommentSource, LogLevel, MemoryLogger};
use crate::metrics::{self, Timer};
use crate::producer::{demo, Producer};
use crate::shutdown::ShutdownCoordinator;
use crate::streaming::{EventStream, OutputSink, RunSummary};

struct HostState {
    config: Config,
    fixture: Value,
    shutdown: ShutdownCoordinator,
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    /// Seconds between entries, overriding `demo.wait_secs`.
    wait: Option<u64>,
}

/// Build the router. Requests to other paths get 404, other methods 405.
pub fn router(
    config: Config,
    fixture: Value,
    shutdown: ShutdownCoordinator,
) -> Result<Router, ServerError> {
    let path = config.server.path.clone();
    if !path.starts_with('/') || path.contains([':', '*']) {
        return Err(ServerError::Config(format!(
            "Invalid stream path {:?}: must start with '/' and contain no ':' or '*'",
            path
        )));
    }

    let state = Arc::new(HostState {
        config,
        fixture,
        shutdown,
    });

    Ok(Router::new()
        .route(&path, get(stream_events))
        .with_state(state)
        .layer(middleware::map_response(record_rejection)))
}

async fn record_rejection(response: Response) -> Response {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        metrics::record_request_error(status.as_u16());
        tracing::info!(status = status.as_u16(), "Rejected request");
    }
    response
}

async fn stream_events(
    State(state): State<Arc<HostState>>,
    Query(params): Query<StreamParams>,
) -> Response {
    if state.shutdown.is_shutdown() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let wait = params
        .wait
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.demo.wait());
    let (transport, body) = body::channel();

    tokio::spawn(run_stream(state, transport, wait).instrument(tracing::Span::current()));

    let mut response = Response::new(body);
    for (name, value) in sse_headers() {
        response.headers_mut().insert(name, value);
    }
    response
}

fn sse_headers() -> impl Iterator<Item = (HeaderName, HeaderValue)> {
    RECOMMENDED_HEADERS.into_iter().filter_map(|(name, value)| {
        let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
        Some((name, HeaderValue::from_static(value)))
    })
}

/// Drive one stream to completion. Errors and panics are logged, never propagated.
async fn run_stream(state: Arc<HostState>, transport: ChannelTransport, wait: Duration) {
    let timer = Timer::new();
    let result = AssertUnwindSafe(drive(&state, transport, wait))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(summary)) => {
            tracing::info!(
                termination = ?summary.termination,
                messages = summary.messages_sent,
                heartbeats = summary.heartbeats_sent,
                bytes = summary.bytes_written,
                duration_ms = timer.elapsed().as_millis() as u64,
                "Stream finished"
            );
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Stream failed");
        }
        Err(panic) => {
            tracing::error!(panic = %panic_message(panic.as_ref()), "Stream panicked");
        }
    }
}

async fn drive(
    state: &HostState,
    transport: ChannelTransport,
    wait: Duration,
) -> Result<RunSummary, StreamError> {
    let settings = &state.config.stream;

    let sink = OutputSink::new(transport).with_write_timeout(settings.write_timeout());
    let mut events = EventStream::from_sink(sink).with_shutdown(state.shutdown.subscribe());
    if let Some(interval) = settings.heartbeat_interval() {
        events = events.with_heartbeat(interval);
    }

    let demo_config = &state.config.demo;
    let fixture = &state.fixture;
    let result = if settings.log_echo {
        let memory = Arc::new(MemoryLogger::new(LogLevel::Debug, settings.log_echo_buffer));
        events = events.with_logger(memory.clone());
        events
            .run(|| {
                demo::from_config(demo_config, fixture, wait).map(|inner| -> Producer {
                    Box::new(LogCommentSource::new(inner, memory))
                })
            })
            .await
    } else {
        events
            .run(|| demo::from_config(demo_config, fixture, wait))
            .await
    };

    // Ends the response body whatever the outcome.
    let mut transport = events.into_sink().into_inner();
    if let Err(e) = transport.shutdown().await {
        tracing::debug!(error = %e, "Closing response body failed");
    }

    result
}
