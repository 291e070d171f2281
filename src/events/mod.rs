// Feed events — the canonical "something happened" records.
//
// Events are appended to a durable log (the source of truth for rebuilds)
// and published on the bus for asynchronous fan-out.

pub mod log;
pub mod model;
pub mod producer;

pub use log::EventLog;
pub use model::{EventPayload, EventType, FeedEvent};
pub use producer::Producer;
