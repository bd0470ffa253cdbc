//! Billing cycle id codec.
//!
//! A cycle id is an 8-digit integer `YYYYMMDD` derived from a UTC calendar
//! date. It is the idempotency discriminator for renewals: the renewal lock
//! key and the `last_renewal_cycle_id` marker both use it, so one
//! subscription can be renewed at most once per billing period.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Error for inputs that cannot be interpreted as a calendar date.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid date: {0}")]
pub struct InvalidDate(pub String);

/// Cycle id for a calendar date: `year * 10000 + month * 100 + day`.
pub fn cycle_id(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Cycle id for a date string.
///
/// Accepts RFC 3339 date-times (any offset, converted to UTC before the
/// calendar date is taken) and bare `YYYY-MM-DD` dates (read as UTC).
pub fn cycle_id_from_str(input: &str) -> Result<u32, InvalidDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(cycle_id(dt.with_timezone(&Utc).date_naive()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(cycle_id(date));
    }
    Err(InvalidDate(input.to_string()))
}

/// Cycle id for a Unix timestamp in seconds.
///
/// Returns `None` for timestamps outside the representable date range.
pub fn cycle_id_from_unix(secs: i64) -> Option<u32> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| cycle_id(dt.date_naive()))
}
