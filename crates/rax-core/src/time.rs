//! Timestamp parsing for API payloads.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a timestamp string from an API payload.
///
/// The legacy services emit RFC 3339 with a numeric offset on most fields
/// and a bare `yyyy-mm-ddThh:mm:ss` (implicitly UTC) on a few older ones;
/// both forms are accepted.
///
/// # Errors
///
/// Returns a parse error when the value matches neither form.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Parse(format!("Invalid timestamp '{value}': {e}")))
}
