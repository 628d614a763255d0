//! The persisted usage record and its window sub-records.
//!
//! All timestamps are Unix epoch milliseconds and all calendar keys are UTC
//! date strings, so stored values compare the same way on every device
//! regardless of timezone or DST.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Length of the rolling minute window in milliseconds.
pub const MINUTE_MS: i64 = 60 * 1000;

/// Length of the rolling hour window in milliseconds.
pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Returns the UTC date key (`YYYY-MM-DD`) for an epoch-millisecond timestamp.
pub fn day_key(now_ms: i64) -> String {
    match Utc.timestamp_millis_opt(now_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

/// Returns the UTC month key (`YYYY-MM`) for an epoch-millisecond timestamp.
pub fn month_key(now_ms: i64) -> String {
    match Utc.timestamp_millis_opt(now_ms).single() {
        Some(dt) => dt.format("%Y-%m").to_string(),
        None => String::new(),
    }
}

/// A fixed-length window anchored at the timestamp of its first call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RollingWindow {
    #[serde(default)]
    pub count: u32,
    /// Epoch milliseconds of the window start. Only ever moves forward.
    #[serde(default)]
    pub start_ms: i64,
}

impl RollingWindow {
    /// Whether `now_ms` still falls inside a window of `len_ms` from the start.
    pub fn is_active(&self, len_ms: i64, now_ms: i64) -> bool {
        now_ms - self.start_ms < len_ms
    }
}

/// A window aligned to a UTC calendar boundary, identified by a string key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CalendarWindow {
    #[serde(default)]
    pub count: u32,
    /// `YYYY-MM-DD` for the day window, `YYYY-MM` for the month window.
    /// UTC strings, so lexicographic order is chronological order.
    #[serde(default)]
    pub key: String,
}

/// Persisted one-shot alert flags for the calendar windows and credits.
///
/// Each flag is monotonic within its window (false to true once) and resets
/// exactly when that window rolls over. Minute/hour flags are transient and
/// live in the emitter instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AlertFlags {
    #[serde(default)]
    pub day80: bool,
    #[serde(default)]
    pub day100: bool,
    #[serde(default)]
    pub month80: bool,
    #[serde(default)]
    pub month100: bool,
    #[serde(default)]
    pub credits_low: bool,
}

/// Usage state for a single identity.
///
/// Two replicas of this record exist: the local cache (fast, optimistic) and
/// the remote store (authoritative for credits). They are reconciled once per
/// sign-in; see the replica module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UsageRecord {
    #[serde(default)]
    pub total_calls: u64,
    #[serde(default)]
    pub minute: RollingWindow,
    #[serde(default)]
    pub hour: RollingWindow,
    #[serde(default)]
    pub day: CalendarWindow,
    #[serde(default)]
    pub month: CalendarWindow,
    /// Primary credit balance. Unsigned, so "never negative" holds by type.
    #[serde(default)]
    pub weather_credits: u32,
    /// Secondary credit balance.
    #[serde(default)]
    pub baro_credits: u32,
    #[serde(default)]
    pub ai_calls: u32,
    #[serde(default)]
    pub ai_calls_day_key: String,
    #[serde(default)]
    pub alerts: AlertFlags,
}

impl UsageRecord {
    /// Creates an all-zero record anchored to the current windows.
    pub fn new(now_ms: i64) -> Self {
        Self {
            total_calls: 0,
            minute: RollingWindow {
                count: 0,
                start_ms: now_ms,
            },
            hour: RollingWindow {
                count: 0,
                start_ms: now_ms,
            },
            day: CalendarWindow {
                count: 0,
                key: day_key(now_ms),
            },
            month: CalendarWindow {
                count: 0,
                key: month_key(now_ms),
            },
            weather_credits: 0,
            baro_credits: 0,
            ai_calls: 0,
            ai_calls_day_key: day_key(now_ms),
            alerts: AlertFlags::default(),
        }
    }

    /// Re-initializes counters and alert flags, optionally zeroing credits.
    ///
    /// This is the administrative reset path; credits survive it unless
    /// explicitly zeroed.
    pub fn reset(&mut self, now_ms: i64, zero_credits: bool) {
        let weather = self.weather_credits;
        let baro = self.baro_credits;
        *self = Self::new(now_ms);
        if !zero_credits {
            self.weather_credits = weather;
            self.baro_credits = baro;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_key_is_utc_date() {
        // 2024-01-02T03:04:05Z
        assert_eq!(day_key(1704164645000), "2024-01-02");
        assert_eq!(month_key(1704164645000), "2024-01");
    }

    #[test]
    fn test_new_record_anchors_windows() {
        let now = 1704164645000;
        let record = UsageRecord::new(now);
        assert_eq!(record.minute.start_ms, now);
        assert_eq!(record.hour.start_ms, now);
        assert_eq!(record.day.key, "2024-01-02");
        assert_eq!(record.month.key, "2024-01");
        assert_eq!(record.ai_calls_day_key, "2024-01-02");
        assert_eq!(record.total_calls, 0);
    }

    #[test]
    fn test_rolling_window_activity() {
        let window = RollingWindow {
            count: 3,
            start_ms: 1000,
        };
        assert!(window.is_active(MINUTE_MS, 1000 + MINUTE_MS - 1));
        assert!(!window.is_active(MINUTE_MS, 1000 + MINUTE_MS));
    }

    #[test]
    fn test_reset_preserves_credits_by_default() {
        let mut record = UsageRecord::new(0);
        record.weather_credits = 7;
        record.baro_credits = 2;
        record.day.count = 12;
        record.alerts.day80 = true;

        record.reset(1704164645000, false);
        assert_eq!(record.day.count, 0);
        assert!(!record.alerts.day80);
        assert_eq!(record.weather_credits, 7);
        assert_eq!(record.baro_credits, 2);

        record.reset(1704164645000, true);
        assert_eq!(record.weather_credits, 0);
        assert_eq!(record.baro_credits, 0);
    }

    #[test]
    fn test_deserialization_defaults_missing_fields() {
        // A record written before the AI counters existed still loads.
        let json = r#"{"total_calls":4,"weather_credits":3}"#;
        let parsed: UsageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.total_calls, 4);
        assert_eq!(parsed.weather_credits, 3);
        assert_eq!(parsed.ai_calls, 0);
        assert_eq!(parsed.ai_calls_day_key, "");
    }
}
