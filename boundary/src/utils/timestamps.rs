//! UTC timestamp helpers.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Error returned when an audit timestamp cannot be parsed.
#[derive(Debug, Error)]
#[error("Invalid timestamp: {0}")]
pub struct TimestampError(pub String);

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`
///
/// # Examples
///
/// ```
/// use boundary::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&now_utc())
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp as ISO 8601 string.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Formats a timestamp as a compact, file-name-safe stamp: `YYYYMMDDTHHMMSSZ`.
#[must_use]
pub fn compact_stamp(dt: &Timestamp) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parses an RFC 3339 / ISO 8601 timestamp with offset into UTC.
pub fn parse_iso8601(s: &str) -> Result<Timestamp, TimestampError> {
    let normalized = s.trim().replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimestampError(s.to_string()))
}
