//! SSE wire format rendering.
//!
//! See <https://html.spec.whatwg.org/multipage/server-sent-events.html#parsing-an-event-stream>.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use super::fields::{Data, FieldKind, FieldSet};
use crate::error::FormatError;

/// Separator written after every wire line.
pub const LINE_SEPARATOR: &str = "\n";

/// Response headers the hosting layer should apply before streaming.
pub const RECOMMENDED_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
    // Disables nginx response buffering.
    ("X-Accel-Buffering", "no"),
];

/// HTTP/1.1 `200 OK` response head carrying [`RECOMMENDED_HEADERS`].
pub fn sse_response_head() -> String {
    let mut head = String::from("HTTP/1.1 200 OK\r\n");
    for (name, value) in RECOMMENDED_HEADERS {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

/// Rendered lines of one message, terminated by two empty lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBlock {
    lines: Vec<String>,
}

impl WireBlock {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Encode each line followed by [`LINE_SEPARATOR`], as written to a sink.
    pub fn line_bytes(&self) -> impl Iterator<Item = Bytes> + '_ {
        self.lines.iter().map(|line| {
            let mut buf = BytesMut::with_capacity(line.len() + LINE_SEPARATOR.len());
            buf.put_slice(line.as_bytes());
            buf.put_slice(LINE_SEPARATOR.as_bytes());
            buf.freeze()
        })
    }

    /// Total number of bytes [`line_bytes`](Self::line_bytes) yields.
    pub fn encoded_len(&self) -> usize {
        self.lines
            .iter()
            .map(|line| line.len() + LINE_SEPARATOR.len())
            .sum()
    }
}

impl fmt::Display for WireBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join(LINE_SEPARATOR))
    }
}

/// Render a field set into wire lines.
///
/// Fields are emitted in [`FieldKind::ALL`] order and followed by two empty lines.
/// Fails with [`FormatError::EmptyRepresentation`] when no field produced a line.
pub fn render_lines(fields: &FieldSet) -> Result<WireBlock, FormatError> {
    let mut lines = Vec::new();

    for kind in FieldKind::ALL {
        push_field(&mut lines, kind, fields);
    }

    if lines.is_empty() {
        return Err(FormatError::EmptyRepresentation);
    }

    lines.push(String::new());
    lines.push(String::new());

    Ok(WireBlock { lines })
}

/// Render a field set into a single string joined by [`LINE_SEPARATOR`].
pub fn render(fields: &FieldSet) -> Result<String, FormatError> {
    render_lines(fields).map(|block| block.to_string())
}

fn push_field(lines: &mut Vec<String>, kind: FieldKind, fields: &FieldSet) {
    match kind {
        FieldKind::Comment => {
            if let Some(comment) = non_empty(&fields.comment) {
                lines.extend(split_segments(comment).into_iter().map(|s| format!(": {}", s)));
            }
        }
        FieldKind::Id => {
            if let Some(id) = non_empty(&fields.id).map(single_line).filter(|s| !s.is_empty()) {
                lines.push(format!("id: {}", id));
            }
        }
        FieldKind::Retry => {
            if let Some(retry) = fields.retry.filter(|r| *r > 0) {
                lines.push(format!("retry: {}", retry));
            }
        }
        FieldKind::Event => {
            if let Some(event) = non_empty(&fields.event)
                .map(single_line)
                .filter(|s| !s.is_empty())
            {
                lines.push(format!("event: {}", event));
            }
        }
        FieldKind::Data => match &fields.data {
            Some(Data::Text(text)) => {
                lines.extend(split_segments(text).into_iter().map(|s| format!("data: {}", s)));
            }
            Some(Data::Lines(segments)) => {
                for segment in segments {
                    lines.extend(
                        split_segments(segment)
                            .into_iter()
                            .map(|s| format!("data: {}", s)),
                    );
                }
            }
            None => {}
        },
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Split on `\r\n`, `\n` or a lone `\r`; `n` breaks always yield `n + 1` segments.
fn split_segments(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                segments.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                segments.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    segments.push(&text[start..]);

    segments
}

fn single_line(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}
