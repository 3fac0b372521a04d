//! Producer trait definitions.

use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::message::{Comment, Event, Message};
use crate::error::StreamError;
use crate::format::FieldSet;

/// One value pulled from a producer.
pub enum StreamItem {
    /// A ready field set.
    Fields(FieldSet),
    /// A value that knows how to describe itself as a field set.
    Message(Box<dyn Message>),
    /// A dynamic message, e.g. read from a JSON fixture. Only objects are valid.
    Json(Value),
}

impl StreamItem {
    pub fn message(message: impl Message + 'static) -> Self {
        StreamItem::Message(Box::new(message))
    }

    /// Convert into the field set that gets rendered.
    pub fn into_field_set(self) -> Result<FieldSet, StreamError> {
        match self {
            StreamItem::Fields(fields) => Ok(fields),
            StreamItem::Message(message) => Ok(message.to_field_set()),
            StreamItem::Json(Value::Object(object)) => Ok(FieldSet::from_json(&object)),
            StreamItem::Json(other) => Err(StreamError::InvalidMessageType(
                json_type_name(&other).to_string(),
            )),
        }
    }
}

impl fmt::Debug for StreamItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamItem::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            StreamItem::Message(message) => f
                .debug_tuple("Message")
                .field(&message.to_field_set())
                .finish(),
            StreamItem::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

impl From<FieldSet> for StreamItem {
    fn from(fields: FieldSet) -> Self {
        StreamItem::Fields(fields)
    }
}

impl From<Value> for StreamItem {
    fn from(value: Value) -> Self {
        StreamItem::Json(value)
    }
}

impl From<Event> for StreamItem {
    fn from(event: Event) -> Self {
        StreamItem::message(event)
    }
}

impl From<Comment> for StreamItem {
    fn from(comment: Comment) -> Self {
        StreamItem::message(comment)
    }
}

/// JSON type name used in error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A pull-based source of stream items.
///
/// `next` may suspend for as long as it likes (timers, external events); the drive loop
/// only calls it again once the previous item has been delivered.
pub trait ItemSource: Send {
    /// Get the next item, or `None` once the source is exhausted.
    #[allow(clippy::type_complexity)]
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<StreamItem>> + Send + '_>>;
}

/// Boxed producer handed to the drive loop.
pub type Producer = Box<dyn ItemSource>;

/// Finite producer over a fixed collection, with an optional delay between items.
pub struct VecSource {
    items: std::vec::IntoIter<StreamItem>,
    delay: Option<Duration>,
    started: bool,
}

impl VecSource {
    pub fn new(items: Vec<StreamItem>, delay: Option<Duration>) -> Self {
        Self {
            items: items.into_iter(),
            delay,
            started: false,
        }
    }
}

impl ItemSource for VecSource {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<StreamItem>> + Send + '_>> {
        let delay = if self.started { self.delay } else { None };
        self.started = true;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            self.items.next()
        })
    }
}

/// Lazy producer over any `futures` stream.
pub struct StreamSource {
    inner: BoxStream<'static, StreamItem>,
}

impl StreamSource {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamItem> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }
}

impl ItemSource for StreamSource {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<StreamItem>> + Send + '_>> {
        Box::pin(self.inner.next())
    }
}

/// Values a producer factory may return.
pub trait IntoProducer {
    fn into_producer(self) -> Result<Producer, StreamError>;
}

impl IntoProducer for Producer {
    fn into_producer(self) -> Result<Producer, StreamError> {
        Ok(self)
    }
}

impl IntoProducer for VecSource {
    fn into_producer(self) -> Result<Producer, StreamError> {
        Ok(Box::new(self))
    }
}

impl IntoProducer for StreamSource {
    fn into_producer(self) -> Result<Producer, StreamError> {
        Ok(Box::new(self))
    }
}

impl IntoProducer for Vec<StreamItem> {
    fn into_producer(self) -> Result<Producer, StreamError> {
        Ok(Box::new(VecSource::new(self, None)))
    }
}

impl IntoProducer for Vec<FieldSet> {
    fn into_producer(self) -> Result<Producer, StreamError> {
        self.into_iter()
            .map(StreamItem::Fields)
            .collect::<Vec<_>>()
            .into_producer()
    }
}

/// A JSON array is a finite collection of dynamic messages; anything else is rejected.
impl IntoProducer for Value {
    fn into_producer(self) -> Result<Producer, StreamError> {
        match self {
            Value::Array(items) => items
                .into_iter()
                .map(StreamItem::Json)
                .collect::<Vec<_>>()
                .into_producer(),
            other => Err(StreamError::InvalidProducerResult(
                json_type_name(&other).to_string(),
            )),
        }
    }
}

impl<P: IntoProducer> IntoProducer for Result<P, StreamError> {
    fn into_producer(self) -> Result<Producer, StreamError> {
        self?.into_producer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn drain(mut producer: Producer) -> Vec<FieldSet> {
        let mut out = Vec::new();
        while let Some(item) = producer.next().await {
            out.push(item.into_field_set().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_vec_source_order() {
        let producer = vec![FieldSet::data("1"), FieldSet::data("2")]
            .into_producer()
            .unwrap();
        assert_eq!(
            drain(producer).await,
            vec![FieldSet::data("1"), FieldSet::data("2")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_vec_source_delay_between_items() {
        let start = tokio::time::Instant::now();
        let source = VecSource::new(
            vec![FieldSet::data("a").into(), FieldSet::data("b").into()],
            Some(Duration::from_secs(2)),
        );
        let items = drain(Box::new(source)).await;
        assert_eq!(items.len(), 2);
        // One delay before the second item and one before reporting exhaustion.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_stream_source() {
        let stream = futures::stream::iter(vec![StreamItem::from(FieldSet::comment("x"))]);
        let items = drain(StreamSource::new(stream).into_producer().unwrap()).await;
        assert_eq!(items, vec![FieldSet::comment("x")]);
    }

    #[test]
    fn test_json_producer_requires_array() {
        assert!(json!([{ "data": "x" }]).into_producer().is_ok());

        match json!({ "data": "x" }).into_producer() {
            Err(StreamError::InvalidProducerResult(kind)) => assert_eq!(kind, "object"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_message_type() {
        let err = StreamItem::Json(json!(42)).into_field_set().unwrap_err();
        assert!(matches!(err, StreamError::InvalidMessageType(ref kind) if kind == "number"));
    }

    #[test]
    fn test_message_conversion() {
        let mut event = Event::new();
        event.set_event("ping");
        event.set_data("pong");
        let fields = StreamItem::from(event).into_field_set().unwrap();
        assert_eq!(fields, FieldSet::new().with_event("ping").with_data("pong"));
    }
}
