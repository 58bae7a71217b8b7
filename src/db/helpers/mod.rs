use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

pub fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Precision every stored timestamp is truncated to.
pub fn truncate_timestamp(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(6)
}

/// Fixed-width RFC 3339 in UTC with a trailing `Z`. Lexicographic order of the
/// output matches chronological order, which the `indexed_at` index relies on.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    truncate_timestamp(*value).to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::microseconds(1);

        let a = format_timestamp(&early);
        let b = format_timestamp(&late);

        assert_eq!(a, "2024-01-01T09:00:00.000000Z");
        assert!(a < b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn stored_timestamps_parse_back() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let parsed = parse_datetime(&format_timestamp(&at), "indexed_at").unwrap();
        assert_eq!(parsed, at);
    }
}
