//! Message types producers can yield instead of raw field sets.

use crate::format::{Data, FieldSet};

/// Anything that can describe itself as a field set.
pub trait Message: Send {
    fn to_field_set(&self) -> FieldSet;
}

/// A general purpose SSE message with setters for every field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    fields: FieldSet,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.fields.comment = Some(comment.into());
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.fields.id = Some(id.into());
    }

    /// Reconnection time in milliseconds; non-positive values are not sent.
    pub fn set_retry(&mut self, retry: i64) {
        self.fields.retry = Some(retry);
    }

    pub fn set_event(&mut self, event: impl Into<String>) {
        self.fields.event = Some(event.into());
    }

    pub fn set_data(&mut self, data: impl Into<Data>) {
        self.fields.data = Some(data.into());
    }
}

impl Message for Event {
    fn to_field_set(&self) -> FieldSet {
        self.fields.clone()
    }
}

/// A comment-only message. Clients ignore it, which makes it useful for keep-alives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comment {
    comment: String,
}

impl Comment {
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
        }
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }
}

impl Message for Comment {
    fn to_field_set(&self) -> FieldSet {
        FieldSet::comment(self.comment.clone())
    }
}
