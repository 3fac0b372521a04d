//! Producers: pull-based sources of messages for the drive loop.

pub mod demo;
mod message;
mod traits;

pub use message::{Comment, Event, Message};
pub use traits::{
    json_type_name, IntoProducer, ItemSource, Producer, StreamItem, StreamSource, VecSource,
};
