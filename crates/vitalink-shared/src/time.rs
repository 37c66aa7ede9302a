//! Normalized timestamps and display formatting.
//!
//! The hosted backends hand back timestamps in several shapes: integer
//! epoch milliseconds, fractional epoch seconds, RFC 3339 strings, and
//! `{seconds, nanoseconds}` objects. Everything is normalized to
//! [`Timestamp`] (epoch milliseconds, UTC) at the ingestion boundary;
//! internal logic never sees any other representation.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Milliseconds since the Unix epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier` (negative if `earlier` is
    /// in the future).
    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }

    /// Convert to a chrono datetime. Returns `None` for values outside
    /// the representable range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// Normalize a raw backend value into a timestamp.
    ///
    /// Accepted shapes, in order of likelihood:
    /// - integer epoch milliseconds
    /// - fractional epoch seconds
    /// - RFC 3339 string
    /// - `{seconds, nanoseconds}` object
    pub fn normalize(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(ms) = n.as_i64() {
                    Some(Self(ms))
                } else {
                    n.as_f64().map(|secs| Self((secs * 1000.0) as i64))
                }
            }
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| Self(dt.with_timezone(&Utc).timestamp_millis())),
            serde_json::Value::Object(map) => {
                let seconds = map.get("seconds").and_then(|v| v.as_i64())?;
                let nanos = map
                    .get("nanoseconds")
                    .or_else(|| map.get("nanos"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                Some(Self(seconds * 1000 + nanos / 1_000_000))
            }
            _ => None,
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Timestamp::normalize(&value)
            .ok_or_else(|| de::Error::custom("unrecognized timestamp representation"))
    }
}

/// Deserialize helper for timestamp fields that must tolerate garbage:
/// an unrecognized representation becomes `None` instead of failing the
/// whole document.
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(Timestamp::normalize(&value))
}

/// Clock time for a message bubble, e.g. `"14:05"`.
/// Malformed timestamps render as an empty string.
pub fn format_time(ts: Timestamp) -> String {
    match ts.to_datetime() {
        Some(dt) => dt.with_timezone(&Local).format("%H:%M").to_string(),
        None => String::new(),
    }
}

/// Day separator label: `"Today"`, `"Yesterday"`, or a short date.
pub fn format_day(ts: Timestamp) -> String {
    let Some(dt) = ts.to_datetime() else {
        return String::new();
    };
    let local = dt.with_timezone(&Local).date_naive();
    let today = Local::now().date_naive();
    match (today - local).num_days() {
        0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        _ => local.format("%d %b %Y").to_string(),
    }
}

/// Conversation-list style relative label: clock time for today,
/// `"Yesterday"`, otherwise a short date.
pub fn format_relative(ts: Timestamp) -> String {
    let Some(dt) = ts.to_datetime() else {
        return String::new();
    };
    let local = dt.with_timezone(&Local);
    let today = Local::now().date_naive();
    match (today - local.date_naive()).num_days() {
        0 => local.format("%H:%M").to_string(),
        1 => "Yesterday".to_string(),
        _ => local.format("%d/%m/%Y").to_string(),
    }
}

/// Presence label: `"last seen 14:05"` or `"last seen 03 Jan 2026"`.
pub fn format_last_seen(ts: Timestamp) -> String {
    let Some(dt) = ts.to_datetime() else {
        return String::new();
    };
    let local = dt.with_timezone(&Local);
    let today = Local::now().date_naive();
    if local.date_naive() == today {
        format!("last seen {}", local.format("%H:%M"))
    } else {
        format!("last seen {}", local.format("%d %b %Y"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_integer_millis() {
        let ts = Timestamp::normalize(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_000);
    }

    #[test]
    fn normalize_fractional_seconds() {
        let ts = Timestamp::normalize(&json!(1_700_000_000.5)).unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_500);
    }

    #[test]
    fn normalize_rfc3339_string() {
        let ts = Timestamp::normalize(&json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_000);
    }

    #[test]
    fn normalize_seconds_nanos_object() {
        let ts =
            Timestamp::normalize(&json!({"seconds": 1_700_000_000, "nanoseconds": 500_000_000}))
                .unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_500);
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(Timestamp::normalize(&json!(null)).is_none());
        assert!(Timestamp::normalize(&json!([1, 2])).is_none());
        assert!(Timestamp::normalize(&json!("not a date")).is_none());
    }

    #[test]
    fn all_representations_agree() {
        let millis = Timestamp::normalize(&json!(1_700_000_000_000i64)).unwrap();
        let string = Timestamp::normalize(&json!("2023-11-14T22:13:20Z")).unwrap();
        let object =
            Timestamp::normalize(&json!({"seconds": 1_700_000_000, "nanoseconds": 0})).unwrap();
        assert_eq!(millis, string);
        assert_eq!(millis, object);
    }

    #[test]
    fn deserialize_through_serde() {
        let ts: Timestamp = serde_json::from_value(json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_000);
        let ts: Timestamp = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(ts.as_millis(), 42);
    }

    #[test]
    fn malformed_formats_to_empty_string() {
        let bad = Timestamp(i64::MAX);
        assert_eq!(format_time(bad), "");
        assert_eq!(format_day(bad), "");
        assert_eq!(format_relative(bad), "");
        assert_eq!(format_last_seen(bad), "");
    }

    #[test]
    fn today_formats_as_clock_time() {
        let now = Timestamp::now();
        let label = format_relative(now);
        assert_eq!(label.len(), 5);
        assert!(label.contains(':'));
    }
}
