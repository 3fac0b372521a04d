//! Stop signal and drain tracking for the demo host.
//!
//! Two watch channels: one carries the stop flag to every running stream, the other the
//! number of open connections, so draining is just waiting for that number to reach zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::metrics;

#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Shared>,
}

struct Shared {
    stop: watch::Sender<bool>,
    active: watch::Sender<u64>,
    next_id: AtomicU64,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                stop: watch::Sender::new(false),
                active: watch::Sender::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Ask every stream to stop after its current message.
    pub fn shutdown(&self) {
        self.inner.stop.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Receiver that turns `true` on shutdown; hand it to
    /// [`EventStream::with_shutdown`](crate::streaming::EventStream::with_shutdown).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.stop.subscribe()
    }

    /// Resolve once shutdown has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    pub fn active_connections(&self) -> u64 {
        *self.inner.active.borrow()
    }

    /// Count a connection as open until the returned guard is dropped.
    pub fn register_connection(&self) -> ConnectionGuard {
        self.inner.active.send_modify(|n| {
            *n += 1;
            metrics::set_active_connections(*n);
        });

        ConnectionGuard {
            shared: Arc::clone(&self.inner),
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Resolve once no connection is open.
    pub async fn wait_for_drain(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One open connection, counted while alive.
pub struct ConnectionGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.shared.active.send_modify(|n| {
            *n = n.saturating_sub(1);
            metrics::set_active_connections(*n);
        });
    }
}
