//! Error types for the message stream engine and its demo host.

use std::io;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced by [`EventStream`](crate::streaming::EventStream).
///
/// Every variant is a misuse of the engine. Disconnects and write failures are not
/// errors; the drive loop reports them through its run summary instead.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Output sink must be a writable stream transport, got {0}")]
    InvalidSinkResource(String),

    #[error("Producer must yield a collection or a lazy sequence of messages, got {0}")]
    InvalidProducerResult(String),

    #[error("Producer must yield a field set or a message, got {0}")]
    InvalidMessageType(String),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors while rendering a field set into wire lines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Field set produced no lines; at least one field needs a value")]
    EmptyRepresentation,

    #[error("Unknown field \"{0}\"; expected one of comment, id, retry, event, data")]
    UnknownField(String),
}

/// Errors from the demo HTTP host.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Socket error: {0}")]
    Socket(String),
}
