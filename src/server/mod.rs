//! Demo HTTP host: hyper connections over a bounded TCP listener, routed by axum.

mod body;
mod connection;
mod listener;
mod routes;

pub use body::{channel, ChannelTransport};
pub use connection::ConnectionHandler;
pub use listener::{AcceptedConnection, SseListener};
pub use routes::router;

use std::any::Any;

/// Best-effort text of a caught panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
