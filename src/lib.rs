// Fanout: hybrid push/pull social feed delivery.
//
// This is the library root. Each module corresponds to one stage of the
// feed pipeline, from the durable event log through fan-out to the
// rendered page a reader sees.

pub mod assembly;
pub mod bus;
pub mod collab;
pub mod config;
pub mod db;
pub mod events;
pub mod fanout;
pub mod feed;
pub mod output;
pub mod rebuild;
pub mod status;
pub mod timeout;
