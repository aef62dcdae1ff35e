//! Timestamp utilities
//!
//! The two stores hand back timestamps in whatever shape their engine
//! prefers (RFC 3339, naive SQL datetime text, epoch seconds). Everything
//! that compares or canonicalizes timestamps funnels through the parsers
//! here so both sides agree on the same instant.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a timestamp from any of the store-native text shapes.
///
/// Accepted: RFC 3339 (any offset), `YYYY-MM-DD HH:MM:SS[.fff]` and
/// `YYYY-MM-DDTHH:MM:SS[.fff]` (naive, assumed UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Parse epoch seconds (integer or fractional) into a UTC timestamp.
pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

/// Canonical text form used in hashing: RFC 3339 UTC, microsecond precision.
pub fn to_canonical(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_timestamp("2024-03-01T10:15:30+02:00").unwrap();
        assert_eq!(to_canonical(dt), "2024-03-01T08:15:30.000000Z");
    }

    #[test]
    fn test_parse_naive_sql_datetime() {
        let dt = parse_timestamp("2024-03-01 10:15:30").unwrap();
        assert_eq!(to_canonical(dt), "2024-03-01T10:15:30.000000Z");
    }

    #[test]
    fn test_parse_naive_with_fraction() {
        let dt = parse_timestamp("2024-03-01T10:15:30.250").unwrap();
        assert_eq!(to_canonical(dt), "2024-03-01T10:15:30.250000Z");
    }

    #[test]
    fn test_parse_rejects_non_timestamps() {
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("42").is_none());
    }

    #[test]
    fn test_equivalent_shapes_agree() {
        let a = parse_timestamp("2024-03-01T10:15:30Z").unwrap();
        let b = parse_timestamp("2024-03-01 10:15:30").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_epoch_seconds() {
        let dt = from_epoch_seconds(1_709_287_200.0).unwrap();
        assert_eq!(to_canonical(dt), "2024-03-01T10:00:00.000000Z");
    }
}
