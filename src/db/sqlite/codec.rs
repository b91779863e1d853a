//! Column encodings shared by the SQLite tables
//!
//! Instants are fixed-width RFC 3339 UTC text and calendar dates are
//! `YYYY-MM-DD`, so range filters are plain text comparisons.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

/// Error for a stored value that does not decode
pub fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

/// Read a required timestamp column
pub fn timestamp_at(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw)
        .ok_or_else(|| conversion_error(column, format!("bad timestamp '{}'", raw)))
}

/// Read a nullable timestamp column
pub fn opt_timestamp_at(
    row: &rusqlite::Row<'_>,
    column: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(column)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(column, format!("bad timestamp '{}'", raw))),
        None => Ok(None),
    }
}

/// Read a nullable date column
pub fn opt_date_at(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match row.get::<_, Option<String>>(column)? {
        Some(raw) => parse_date(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(column, format!("bad date '{}'", raw))),
        None => Ok(None),
    }
}
