//! Serves HTTP/1.1 on one accepted client connection.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use axum::Router;
use futures::FutureExt;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::Instrument;

use super::panic_message;
use super::routes::router;
use crate::config::Config;
use crate::error::ServerError;
use crate::shutdown::{ConnectionGuard, ShutdownCoordinator};

/// hyper refuses read buffers smaller than this.
const MIN_READ_BUFFER: usize = 8192;

/// Serves client connections with the demo router.
pub struct ConnectionHandler {
    router: Router,
    shutdown: ShutdownCoordinator,
    request_timeout: Duration,
    max_buf_size: usize,
}

impl ConnectionHandler {
    /// `fixture` is the JSON array replayed after the welcome comment.
    pub fn new(
        config: Config,
        fixture: Value,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self, ServerError> {
        let request_timeout = config.server.request_timeout();
        let max_buf_size = config.server.max_request_bytes.max(MIN_READ_BUFFER);

        Ok(Self {
            router: router(config, fixture, shutdown.clone())?,
            shutdown,
            request_timeout,
            max_buf_size,
        })
    }

    /// Serve a client until it disconnects or the host shuts down. Errors and panics
    /// are logged, never propagated, so one bad connection cannot take the accept loop
    /// down. The guard keeps the connection counted until then.
    pub async fn handle(&self, stream: TcpStream, guard: ConnectionGuard) {
        let conn_id = guard.id();
        let span = tracing::info_span!("connection", id = conn_id);

        let result = AssertUnwindSafe(self.serve(stream))
            .catch_unwind()
            .instrument(span)
            .await;

        match result {
            Ok(Ok(())) => {
                tracing::debug!(id = conn_id, "Connection completed");
            }
            Ok(Err(e)) => {
                tracing::debug!(id = conn_id, error = %e, "Connection error");
            }
            Err(panic) => {
                tracing::error!(
                    id = conn_id,
                    panic = %panic_message(panic.as_ref()),
                    "Connection handler panicked"
                );
            }
        }

        drop(guard);
    }

    async fn serve(&self, stream: TcpStream) -> Result<(), hyper::Error> {
        let io = TokioIo::new(stream);
        let service = TowerToHyperService::new(self.router.clone());

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.request_timeout)
            .max_buf_size(self.max_buf_size);

        let conn = builder.serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => return result,
            _ = self.shutdown.stopped() => {}
        }

        // Finish the response in flight, which ends once its stream sees the same
        // signal, then close instead of waiting for another request.
        conn.as_mut().graceful_shutdown();
        conn.await
    }
}
