//! Timestamp and shell-quoting helpers shared by the pipeline components.

pub mod shell;
pub mod timestamps;

pub use shell::quote;
pub use timestamps::{compact_stamp, format_iso8601, iso_timestamp, now_utc, parse_iso8601, Timestamp};
