//! Codec - Timestamp Wire Format
//!
//! TigerStyle: pure, stateless transforms with an exact round-trip law.
//!
//! Timestamps cross the storage boundary as ISO-8601 strings with
//! microsecond precision. Everything else in a record passes through
//! unchanged; the storage format has no other codecs.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::constants::TIMESTAMP_FORMAT;

use super::error::{StorageError, StorageResult};

/// Current instant, truncated to microsecond precision.
///
/// Truncation keeps `decode(encode(t)) == t` exact: the wire format carries
/// microseconds, so entities never hold sub-microsecond state.
#[must_use]
pub fn now() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

/// Drop sub-microsecond precision from a timestamp.
#[must_use]
pub fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    // Wall-clock values cannot overflow the micros range.
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// Encode a timestamp into its wire form.
///
/// Deterministic: a fixed timestamp always encodes to the same string.
#[must_use]
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Decode a wire-form timestamp.
///
/// # Errors
/// Returns [`StorageError::Format`] if the string does not match the wire
/// format.
pub fn decode_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StorageError::format(format!("bad timestamp {value:?}: {e}")))
}
