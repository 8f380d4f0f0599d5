//! Column encoding shared by the CRUD modules.
//!
//! Timestamps are stored as RFC 3339 text with a fixed microsecond precision so
//! that lexical order in SQLite matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

pub(crate) fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_uuid(idx: usize, text: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_byte<T>(idx: usize, value: i64, parse: fn(u8) -> Option<T>) -> rusqlite::Result<T> {
    u8::try_from(value)
        .ok()
        .and_then(parse)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, value))
}
