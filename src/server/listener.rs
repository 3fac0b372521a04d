//! TCP listener for SSE clients.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::metrics;
use crate::shutdown::{ConnectionGuard, ShutdownCoordinator};

/// Accepts browser connections, at most `max_connections` at a time.
pub struct SseListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    connection_semaphore: Arc<Semaphore>,
    shutdown: ShutdownCoordinator,
}

impl SseListener {
    /// Bind to `config.listen_addr`. Port 0 picks a free port; see [`SseListener::local_addr`].
    pub async fn bind(config: &ServerConfig, shutdown: ShutdownCoordinator) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
            ServerError::Socket(format!("Failed to bind {}: {}", config.listen_addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            max_connections = config.max_connections,
            "SSE listener bound"
        );

        Ok(Self {
            listener,
            local_addr,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            shutdown,
        })
    }

    /// Accept the next client.
    ///
    /// Returns `None` once shutdown has been signaled. Transient accept errors are
    /// logged and retried after a short backoff.
    pub async fn accept(&self) -> Option<AcceptedConnection> {
        loop {
            if self.shutdown.is_shutdown() {
                return None;
            }

            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!("At connection capacity, waiting for a slot");
                    tokio::select! {
                        biased;
                        _ = self.shutdown.stopped() => return None,
                        permit = self.connection_semaphore.clone().acquire_owned() => match permit {
                            Ok(p) => p,
                            Err(_) => return None,
                        },
                    }
                }
            };

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.stopped() => return None,
                result = self.listener.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    metrics::record_connection_accepted();

                    return Some(AcceptedConnection {
                        stream,
                        peer,
                        _permit: permit,
                        guard: self.shutdown.register_connection(),
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept error");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> u64 {
        self.shutdown.active_connections()
    }

    /// Remaining connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_semaphore.available_permits()
    }
}

/// An accepted client with its capacity permit and drain guard.
pub struct AcceptedConnection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Released when dropped.
    _permit: OwnedSemaphorePermit,
    pub guard: ConnectionGuard,
}
