//! Utility functions for the SCIM engine

use chrono::{DateTime, NaiveDateTime, Utc};

/// Formats a DateTime to SCIM 2.0 compliant XSD dateTime format
///
/// SCIM 2.0 (RFC 7643 section 2.3.5) requires XSD dateTime values. Timestamps are
/// written with millisecond precision in UTC.
///
/// Example output: "2025-06-14T10:03:54.374Z"
pub fn format_scim_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Gets the current time formatted for SCIM 2.0
pub fn current_scim_datetime() -> String {
    format_scim_datetime(Utc::now())
}

/// Parses an xsd:dateTime literal
///
/// Accepts RFC 3339 values with offset, and values without any offset which are
/// taken as UTC (xsd:dateTime allows the timezone to be omitted).
pub fn parse_scim_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
