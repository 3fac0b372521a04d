//! Server-Sent Events emitter.
//!
//! [`format`] turns field sets into SSE wire lines; [`streaming::EventStream`] pulls
//! messages from a producer and writes them to one output channel until the producer is
//! exhausted or the client goes away. The [`server`] module hosts it over HTTP/1.1 for
//! browsers.

pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod metrics;
pub mod producer;
pub mod server;
pub mod shutdown;
pub mod streaming;

pub use config::Config;
pub use error::{FormatError, Result, StreamError};
pub use format::{render, render_lines, FieldSet};
pub use producer::{IntoProducer, ItemSource, Producer, StreamItem};
pub use streaming::{EventStream, OutputSink, RunSummary, ShutdownCause, Termination};
