//! Adapters: stock implementations of the port traits.
//!
//! | Adapter    | Implements | Connects to        |
//! |------------|------------|--------------------|
//! | `log_sink` | EventSink  | `log` facade       |
//! | `time`     | Clock      | `Instant` / manual |
//!
//! The radio adapter is platform specific and lives with the
//! application.

pub mod log_sink;
pub mod time;

pub use log_sink::LogEventSink;
pub use time::{ManualClock, SystemClock};
