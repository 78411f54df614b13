//! Shared core types: events, time ranges, and formatting helpers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Opaque event ordinal, strictly increasing in insertion order.
pub type EventId = i64;

/// Open-ended event attribute bag (unknown keys are ignored, never an error).
pub type Attributes = BTreeMap<String, String>;

/// Timestamp format used for SQLite storage (UTC, second precision).
pub const SQL_TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp format used for minute-resolution report labels.
pub const MINUTE_FMT: &str = "%Y-%m-%d %H:%M";

/// Date format used for partition directories and query parameters.
pub const DATE_FMT: &str = "%Y-%m-%d";

/// Kind of a stored camera event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A vehicle passage detected by the camera's tripwire rule.
    Traffic,
    /// A perimeter intrusion detection.
    Intrusion,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Traffic => "traffic",
            EventKind::Intrusion => "intrusion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "traffic" => Some(EventKind::Traffic),
            "intrusion" => Some(EventKind::Intrusion),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored camera event. Immutable once inserted.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    #[serde(serialize_with = "serialize_sql_time")]
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub source: String,
    pub attributes: Attributes,
}

/// Half-open UTC time interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    #[serde(serialize_with = "serialize_minute")]
    pub start: DateTime<Utc>,
    #[serde(serialize_with = "serialize_minute")]
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn serialize_sql_time<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format(SQL_TIME_FMT).to_string())
}

fn serialize_minute<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format(MINUTE_FMT).to_string())
}

/// Formats a UTC instant the way it is stored in SQLite.
pub fn to_sql_time(t: DateTime<Utc>) -> String {
    t.format(SQL_TIME_FMT).to_string()
}

/// Parses a stored SQLite timestamp back into a UTC instant.
pub fn from_sql_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, SQL_TIME_FMT)
        .ok()
        .map(|n| n.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_kind_round_trip() {
        assert_eq!(EventKind::parse("traffic"), Some(EventKind::Traffic));
        assert_eq!(EventKind::parse("intrusion"), Some(EventKind::Intrusion));
        assert_eq!(EventKind::parse("unknown"), None);
        assert_eq!(EventKind::Traffic.as_str(), "traffic");
    }

    #[test]
    fn test_sql_time_round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 15).unwrap();
        let s = to_sql_time(t);
        assert_eq!(s, "2024-06-01 08:00:15");
        assert_eq!(from_sql_time(&s), Some(t));
    }

    #[test]
    fn test_time_range_contains() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, end);
        assert!(range.contains(start));
        assert!(!range.contains(end));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
    }
}
