//! The streaming engine: output sinks and the drive loop.

mod engine;
mod sink;

pub use engine::{
    Delivery, EventStream, RunSummary, ShutdownCause, StreamState, Termination,
    HEARTBEAT_COMMENT,
};
pub use sink::{OutputSink, Transport};
