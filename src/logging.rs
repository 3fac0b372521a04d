//! Logging capability consumed by the drive loop.
//!
//! The engine never logs through a global; it is handed an [`StreamLogger`] and only
//! calls `debug` and `notice`. Neither can fail, so a broken logger never stops a stream.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::format::FieldSet;
use crate::producer::{ItemSource, Producer, StreamItem};

/// Log target used by [`TracingLogger`].
pub const LOG_TARGET: &str = "message_stream";

/// Receiver for engine log events.
pub trait StreamLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn notice(&self, message: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl StreamLogger for NullLogger {
    fn debug(&self, _message: &str) {}
    fn notice(&self, _message: &str) {}
}

/// Forwards to `tracing`; notices are logged at `INFO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl StreamLogger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: LOG_TARGET, "{}", message);
    }

    fn notice(&self, message: &str) {
        tracing::info!(target: LOG_TARGET, "{}", message);
    }
}

/// Severity levels understood by [`MemoryLogger`], lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps the most recent log lines in memory so they can be echoed to the client.
///
/// Entries below the action level are dropped. At most `max_buffer_size` entries are
/// retained, oldest evicted first; a size of 0 retains nothing.
#[derive(Debug)]
pub struct MemoryLogger {
    action_level: Mutex<LogLevel>,
    max_buffer_size: usize,
    entries: Mutex<VecDeque<String>>,
}

impl MemoryLogger {
    pub fn new(action_level: LogLevel, max_buffer_size: usize) -> Self {
        Self {
            action_level: Mutex::new(action_level),
            max_buffer_size,
            entries: Mutex::new(VecDeque::with_capacity(max_buffer_size)),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.has_buffer() || level < self.action_level() {
            return;
        }

        let line = format!(
            "[{}] {}: {}",
            level,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        );

        if let Ok(mut entries) = self.entries.lock() {
            while entries.len() >= self.max_buffer_size {
                entries.pop_front();
            }
            entries.push_back(line);
        }
    }

    pub fn action_level(&self) -> LogLevel {
        self.action_level
            .lock()
            .map(|level| *level)
            .unwrap_or(LogLevel::Debug)
    }

    pub fn set_action_level(&self, level: LogLevel) {
        if let Ok(mut current) = self.action_level.lock() {
            *current = level;
        }
    }

    /// Take every buffered entry, oldest first.
    pub fn flush_log_messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|mut entries| entries.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn has_log_messages(&self) -> bool {
        self.entries
            .lock()
            .map(|entries| !entries.is_empty())
            .unwrap_or(false)
    }

    pub fn has_buffer(&self) -> bool {
        self.max_buffer_size > 0
    }
}

impl StreamLogger for MemoryLogger {
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn notice(&self, message: &str) {
        self.log(LogLevel::Notice, message);
    }
}

/// Producer adapter that echoes buffered log lines to the client as comments.
///
/// After each item of the wrapped producer has been delivered, the next pull first
/// yields one comment per line the logger collected meanwhile. Lines logged while the
/// echo itself is written are discarded so the echo does not feed itself.
pub struct LogCommentSource {
    inner: Producer,
    logger: Arc<MemoryLogger>,
    pending: VecDeque<String>,
    item_delivered: bool,
    echoing: bool,
}

impl LogCommentSource {
    pub fn new(inner: Producer, logger: Arc<MemoryLogger>) -> Self {
        Self {
            inner,
            logger,
            pending: VecDeque::new(),
            item_delivered: false,
            echoing: false,
        }
    }
}

impl ItemSource for LogCommentSource {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<StreamItem>> + Send + '_>> {
        if self.item_delivered {
            self.item_delivered = false;
            self.pending.extend(self.logger.flush_log_messages());
            self.echoing = !self.pending.is_empty();
        }

        if let Some(line) = self.pending.pop_front() {
            return Box::pin(async move { Some(StreamItem::Fields(FieldSet::comment(line))) });
        }

        if self.echoing {
            self.echoing = false;
            self.logger.flush_log_messages();
        }

        Box::pin(async move {
            let item = self.inner.next().await;
            self.item_delivered = item.is_some();
            item
        })
    }
}
