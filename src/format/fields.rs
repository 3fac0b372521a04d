//! Field sets: the structured form of a single SSE message.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::FormatError;

/// The fields an SSE message may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Comment,
    Id,
    Retry,
    Event,
    Data,
}

impl FieldKind {
    /// All field kinds in wire emission order.
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Comment,
        FieldKind::Id,
        FieldKind::Retry,
        FieldKind::Event,
        FieldKind::Data,
    ];

    /// Field name as used in message objects.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Comment => "comment",
            FieldKind::Id => "id",
            FieldKind::Retry => "retry",
            FieldKind::Event => "event",
            FieldKind::Data => "data",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldKind {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| FormatError::UnknownField(s.to_string()))
    }
}

/// Payload of the `data` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    /// A single string; line breaks split it into several `data:` lines.
    Text(String),
    /// An ordered list of segments, one `data:` line each.
    Lines(Vec<String>),
}

impl From<String> for Data {
    fn from(text: String) -> Self {
        Data::Text(text)
    }
}

impl From<&str> for Data {
    fn from(text: &str) -> Self {
        Data::Text(text.to_string())
    }
}

impl From<Vec<String>> for Data {
    fn from(lines: Vec<String>) -> Self {
        Data::Lines(lines)
    }
}

impl From<Vec<&str>> for Data {
    fn from(lines: Vec<&str>) -> Self {
        Data::Lines(lines.into_iter().map(str::to_string).collect())
    }
}

/// One message worth of optional fields.
///
/// Absent and empty values are skipped by the formatter, as is a non-positive `retry`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    pub comment: Option<String>,
    pub id: Option<String>,
    pub retry: Option<i64>,
    pub event: Option<String>,
    pub data: Option<Data>,
}

impl FieldSet {
    /// Create an empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a comment-only field set.
    pub fn comment(text: impl Into<String>) -> Self {
        Self::new().with_comment(text)
    }

    /// Create a data-only field set.
    pub fn data(data: impl Into<Data>) -> Self {
        Self::new().with_data(data)
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry: i64) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Data>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Build a field set from a JSON message object.
    ///
    /// Keys that do not name a [`FieldKind`] are ignored. Scalars become text, `null`
    /// means absent, and `retry` accepts numbers or numeric strings (anything else
    /// counts as 0).
    pub fn from_json(object: &Map<String, Value>) -> Self {
        let mut fields = FieldSet::new();

        for (key, value) in object {
            let Ok(kind) = key.parse::<FieldKind>() else {
                continue;
            };
            match kind {
                FieldKind::Comment => fields.comment = scalar_text(value),
                FieldKind::Id => fields.id = scalar_text(value),
                FieldKind::Retry => fields.retry = retry_value(value),
                FieldKind::Event => fields.event = scalar_text(value),
                FieldKind::Data => fields.data = data_value(value),
            }
        }

        fields
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn retry_value(value: &Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(
            n.as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
        ),
        Value::String(s) => Some(s.trim().parse().unwrap_or(0)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Array(_) | Value::Object(_) => Some(0),
    }
}

fn data_value(value: &Value) -> Option<Data> {
    match value {
        Value::Array(items) => Some(Data::Lines(items.iter().filter_map(scalar_text).collect())),
        other => scalar_text(other).map(Data::Text),
    }
}
