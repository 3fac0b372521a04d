//! Demo producers for the bundled HTTP host.
//!
//! The fixture producer greets the client and then replays a JSON fixture, waiting
//! between entries. The ticker emits a numbered `tick` event on an interval.

use futures::stream;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use super::message::{Comment, Event};
use super::traits::{json_type_name, ItemSource, Producer, StreamItem, StreamSource};
use crate::config::{DemoConfig, DemoProducer};
use crate::error::{ServerError, StreamError};

/// Fixture replayed when no fixture file is configured.
pub const DEFAULT_FIXTURE: &str = include_str!("../../demos/message_stream.json");

/// Greeting sent before the fixture entries.
pub const WELCOME: &str = "Welcome!";

/// Load a fixture file. The content must be JSON; its shape is checked when the
/// producer is built.
pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<Value, ServerError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        ServerError::Config(format!(
            "Failed to read fixture {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    parse_fixture(&content)
}

/// Parse fixture JSON.
pub fn parse_fixture(content: &str) -> Result<Value, ServerError> {
    serde_json::from_str(content)
        .map_err(|e| ServerError::Config(format!("Failed to parse fixture: {}", e)))
}

/// The producer `config` selects, pacing entries `wait` apart.
pub fn from_config(
    config: &DemoConfig,
    fixture: &Value,
    wait: Duration,
) -> Result<Producer, StreamError> {
    match config.producer {
        DemoProducer::Fixture => welcome_and_fixture(fixture.clone(), wait),
        DemoProducer::Ticker => Ok(ticker(wait, config.tick_limit)),
    }
}

/// Welcome comment followed by every fixture entry, `wait` apart.
///
/// Fails with [`StreamError::InvalidProducerResult`] if the fixture is not an array.
pub fn welcome_and_fixture(fixture: Value, wait: Duration) -> Result<Producer, StreamError> {
    match fixture {
        Value::Array(entries) => Ok(Box::new(FixtureSource {
            welcomed: false,
            entries: entries.into_iter(),
            wait,
            waiting: false,
        })),
        other => Err(StreamError::InvalidProducerResult(
            json_type_name(&other).to_string(),
        )),
    }
}

struct FixtureSource {
    welcomed: bool,
    entries: std::vec::IntoIter<Value>,
    wait: Duration,
    // Set once an entry went out; the wait happens on the following pull.
    waiting: bool,
}

impl ItemSource for FixtureSource {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<StreamItem>> + Send + '_>> {
        Box::pin(async move {
            if !self.welcomed {
                self.welcomed = true;
                return Some(Comment::new(WELCOME).into());
            }

            if self.waiting && !self.wait.is_zero() {
                tokio::time::sleep(self.wait).await;
            }

            let entry = self.entries.next()?;
            self.waiting = true;
            Some(StreamItem::Json(entry))
        })
    }
}

/// Numbered `tick` events every `interval`, forever or up to `limit`.
pub fn ticker(interval: Duration, limit: Option<u64>) -> Producer {
    let ticks = stream::unfold(0u64, move |n| async move {
        if limit.is_some_and(|max| n >= max) {
            return None;
        }
        if n > 0 {
            tokio::time::sleep(interval).await;
        }

        let mut event = Event::new();
        event.set_id(n.to_string());
        event.set_event("tick");
        event.set_data(chrono::Utc::now().to_rfc3339());
        Some((StreamItem::from(event), n + 1))
    });

    Box::new(StreamSource::new(ticks))
}
