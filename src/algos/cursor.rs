use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::db::helpers::format_timestamp;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses a pagination cursor. Accepts RFC 3339 (`Z` or an explicit offset)
/// and offset-less ISO-8601 timestamps, which are taken as UTC. Returns `None`
/// for anything else.
pub fn parse_cursor(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_cursor(at: &DateTime<Utc>) -> String {
    format_timestamp(at)
}
