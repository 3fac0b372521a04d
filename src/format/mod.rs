//! SSE message formatting.

mod fields;
mod wire;

pub use fields::{Data, FieldKind, FieldSet};
pub use wire::{
    render, render_lines, sse_response_head, WireBlock, LINE_SEPARATOR, RECOMMENDED_HEADERS,
};
