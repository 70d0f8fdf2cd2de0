//! Streaming transcoder: the event model, NDJSON framing and the metered
//! pump that drives provider streams to completion.

pub mod events;
pub mod lines;
pub mod ndjson;
pub mod pump;

pub use events::{BlockStart, Delta, StreamEvent};
pub use lines::LineBuffer;
pub use ndjson::{NdjsonParser, NdjsonStream, encode_event};
pub use pump::{EventStream, MeterFn, spawn_metered};
