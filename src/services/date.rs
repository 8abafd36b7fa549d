use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid date format: {0}")]
pub struct DateError(pub String);

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// Convert a date string to seconds since the unix epoch.
///
/// Accepts RFC 3339, RFC 2822, ISO-like date-times without a zone (read as
/// UTC), plain dates (midnight UTC) and integer unix timestamps.
pub fn to_unix_timestamp(date_str: &str) -> Result<i64, DateError> {
    let s = date_str.trim();
    if s.is_empty() {
        return Err(DateError(date_str.to_string()));
    }

    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.timestamp());
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&naive).timestamp());
            }
        }
    }

    Err(DateError(date_str.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339() {
        assert_eq!(to_unix_timestamp("2021-01-21T10:00:00Z"), Ok(1611223200));
        assert_eq!(to_unix_timestamp("2021-01-21T12:00:00+02:00"), Ok(1611223200));
    }

    #[test]
    fn test_naive_datetime_is_utc() {
        assert_eq!(to_unix_timestamp("2021-01-21 10:00:00"), Ok(1611223200));
        assert_eq!(to_unix_timestamp("2021-01-21T10:00:00.250"), Ok(1611223200));
    }

    #[test]
    fn test_plain_dates() {
        assert_eq!(to_unix_timestamp("2021-01-21"), Ok(1611187200));
        assert_eq!(to_unix_timestamp("2021/01/21"), Ok(1611187200));
        assert_eq!(to_unix_timestamp("21.01.2021"), Ok(1611187200));
    }

    #[test]
    fn test_rfc2822() {
        assert_eq!(
            to_unix_timestamp("Thu, 21 Jan 2021 10:00:00 +0000"),
            Ok(1611223200)
        );
    }

    #[test]
    fn test_unix_seconds() {
        assert_eq!(to_unix_timestamp("1611223200"), Ok(1611223200));
    }

    #[test]
    fn test_invalid() {
        assert!(to_unix_timestamp("not a date").is_err());
        assert!(to_unix_timestamp("   ").is_err());
        assert!(to_unix_timestamp("2021-13-45").is_err());
    }
}
