use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{CellDbError, Result};
use crate::value::Timestamp;

pub fn unix_millis() -> Timestamp {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// A point in time as unix milliseconds or an ISO-8601 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Millis(Timestamp),
    Text(String),
}

impl TimeSpec {
    pub fn resolve(&self) -> Result<Timestamp> {
        match self {
            TimeSpec::Millis(ms) => Ok(*ms),
            TimeSpec::Text(s) => parse_iso_timestamp(s),
        }
    }
}

/// Accepts integer milliseconds or an ISO-8601 date/datetime string.
pub fn parse_timestamp(value: &serde_json::Value) -> Result<Timestamp> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| CellDbError::eval(format!("invalid timestamp {n}"))),
        serde_json::Value::String(s) => parse_iso_timestamp(s),
        other => Err(CellDbError::eval(format!("invalid timestamp {other}"))),
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses an RFC 3339 timestamp, or `YYYY-MM-DD[(T| )HH:MM[:SS[.fff]]][Z]`
/// taken as UTC, into milliseconds.
pub fn parse_iso_timestamp(s: &str) -> Result<Timestamp> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| CellDbError::eval(format!("invalid timestamp '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_dates() {
        assert_eq!(parse_iso_timestamp("1970-01-01").unwrap(), 0);
        assert_eq!(parse_iso_timestamp("2015-01-01").unwrap(), 1_420_070_400_000);
    }

    #[test]
    fn parses_datetimes_with_fraction() {
        assert_eq!(
            parse_iso_timestamp("1970-01-02T00:00:01.5Z").unwrap(),
            86_401_500
        );
        assert_eq!(parse_iso_timestamp("1970-01-01 01:00").unwrap(), 3_600_000);
    }

    #[test]
    fn json_numbers_are_millis() {
        assert_eq!(parse_timestamp(&serde_json::json!(42)).unwrap(), 42);
        assert!(parse_timestamp(&serde_json::json!(true)).is_err());
        assert!(parse_iso_timestamp("2015-13-01").is_err());
    }

    #[test]
    fn time_specs_accept_both_forms() {
        let millis: TimeSpec = serde_json::from_value(serde_json::json!(1500)).unwrap();
        assert_eq!(millis.resolve().unwrap(), 1500);
        let text: TimeSpec = serde_json::from_value(serde_json::json!("2015-01-01")).unwrap();
        assert_eq!(text.resolve().unwrap(), 1_420_070_400_000);
        assert!(TimeSpec::Text("soon".into()).resolve().is_err());
    }

    #[test]
    fn impossible_calendar_dates_are_rejected() {
        assert!(parse_iso_timestamp("2015-02-31").is_err());
        assert!(parse_iso_timestamp("2015-04-31T00:00:00").is_err());
        assert!(parse_iso_timestamp("2016-02-29").is_ok());
    }

    #[test]
    fn offsets_are_honored() {
        assert_eq!(
            parse_iso_timestamp("1970-01-01T01:00:00+01:00").unwrap(),
            0
        );
    }
}
