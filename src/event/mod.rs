//! Event Module - run audit trail
//!
//! - `log`: append-only [`EventLog`] of one stack run

mod log;

pub use log::{Event, EventKind, EventLog};
