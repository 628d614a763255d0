//! Replica reconciliation: merging the local cached record with the
//! authoritative remote record at sign-in.
//!
//! The merge is a total function with a deterministic result for every input
//! pair; it never fails. The general rule per window: a strictly newer key
//! wins wholesale, equal keys take the max of counts, and a stale remote
//! never regresses a local rollover. Credits come from the remote outright,
//! and alert flags are OR-ed so a crossing recorded by either replica stays
//! recorded.

use crate::record::{CalendarWindow, RollingWindow, UsageRecord};
use std::cmp::Ordering;

/// Merges two windows anchored at epoch-millisecond starts.
fn merge_rolling(local: RollingWindow, remote: RollingWindow) -> RollingWindow {
    match remote.start_ms.cmp(&local.start_ms) {
        Ordering::Greater => remote,
        Ordering::Equal => RollingWindow {
            count: local.count.max(remote.count),
            start_ms: local.start_ms,
        },
        Ordering::Less => local,
    }
}

/// Merges two calendar windows keyed by UTC date/month strings.
///
/// Keys are UTC-formatted, so lexicographic comparison is chronological
/// comparison.
fn merge_calendar(local: &CalendarWindow, remote: &CalendarWindow) -> CalendarWindow {
    match remote.key.cmp(&local.key) {
        Ordering::Greater => remote.clone(),
        Ordering::Equal => CalendarWindow {
            count: local.count.max(remote.count),
            key: local.key.clone(),
        },
        Ordering::Less => local.clone(),
    }
}

/// Reconciles the local replica against a freshly-fetched remote replica.
pub fn merge(local: &UsageRecord, remote: &UsageRecord) -> UsageRecord {
    let (ai_calls, ai_calls_day_key) = match remote.ai_calls_day_key.cmp(&local.ai_calls_day_key)
    {
        Ordering::Greater => (remote.ai_calls, remote.ai_calls_day_key.clone()),
        Ordering::Equal => (
            local.ai_calls.max(remote.ai_calls),
            local.ai_calls_day_key.clone(),
        ),
        Ordering::Less => (local.ai_calls, local.ai_calls_day_key.clone()),
    };

    UsageRecord {
        total_calls: local.total_calls.max(remote.total_calls),
        minute: merge_rolling(local.minute, remote.minute),
        hour: merge_rolling(local.hour, remote.hour),
        day: merge_calendar(&local.day, &remote.day),
        month: merge_calendar(&local.month, &remote.month),
        // Remote is authoritative for money-like balances; a device that
        // never synced must not keep credits another device already spent.
        weather_credits: remote.weather_credits,
        baro_credits: remote.baro_credits,
        ai_calls,
        ai_calls_day_key,
        alerts: crate::record::AlertFlags {
            day80: local.alerts.day80 || remote.alerts.day80,
            day100: local.alerts.day100 || remote.alerts.day100,
            month80: local.alerts.month80 || remote.alerts.month80,
            month100: local.alerts.month100 || remote.alerts.month100,
            credits_low: local.alerts.credits_low || remote.alerts.credits_low,
        },
    }
}

/// Serializes the record for the bulk remote push, stripping credit fields.
///
/// Credits may only change through consumption and top-up, both of which go
/// through atomic server-side increments. Leaving them out of the bulk write
/// means a stale push can never resurrect a spent balance.
pub fn sync_document(record: &UsageRecord) -> serde_json::Value {
    let mut value = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
    if let serde_json::Value::Object(map) = &mut value {
        map.remove("weather_credits");
        map.remove("baro_credits");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_with_day(key: &str, count: u32) -> UsageRecord {
        let mut record = UsageRecord::new(0);
        record.day.key = key.to_string();
        record.day.count = count;
        record.month.key = "2024-01".to_string();
        record
    }

    #[test]
    fn test_same_key_counts_take_max() {
        let local = record_with_day("2024-01-02", 8);
        let remote = record_with_day("2024-01-02", 3);
        let merged = merge(&local, &remote);
        assert_eq!(merged.day.count, 8);
        assert_eq!(merged.day.key, "2024-01-02");
    }

    #[test]
    fn test_newer_remote_key_wins_wholesale() {
        let local = record_with_day("2024-01-01", 50);
        let remote = record_with_day("2024-01-02", 2);
        let merged = merge(&local, &remote);
        assert_eq!(merged.day.key, "2024-01-02");
        assert_eq!(merged.day.count, 2);
    }

    #[test]
    fn test_stale_remote_key_never_regresses_local() {
        let local = record_with_day("2024-01-02", 4);
        let remote = record_with_day("2024-01-01", 99);
        let merged = merge(&local, &remote);
        assert_eq!(merged.day.key, "2024-01-02");
        assert_eq!(merged.day.count, 4);
    }

    #[test]
    fn test_remote_credits_win_even_when_lower() {
        let mut local = UsageRecord::new(0);
        local.weather_credits = 5;
        local.baro_credits = 2;
        let mut remote = UsageRecord::new(0);
        remote.weather_credits = 0;
        remote.baro_credits = 7;
        let merged = merge(&local, &remote);
        assert_eq!(merged.weather_credits, 0);
        assert_eq!(merged.baro_credits, 7);
    }

    #[test]
    fn test_newer_remote_rolling_window_wins_wholesale() {
        let mut local = UsageRecord::new(1000);
        local.hour.count = 40;
        let mut remote = UsageRecord::new(2000);
        remote.hour.count = 3;
        let merged = merge(&local, &remote);
        assert_eq!(merged.hour.count, 3);
        assert_eq!(merged.hour.start_ms, 2000);
    }

    #[test]
    fn test_alert_flags_or_across_replicas() {
        let mut local = UsageRecord::new(0);
        local.alerts.day80 = true;
        let mut remote = UsageRecord::new(0);
        remote.alerts.month100 = true;
        remote.alerts.credits_low = true;
        let merged = merge(&local, &remote);
        assert!(merged.alerts.day80);
        assert!(merged.alerts.month100);
        assert!(merged.alerts.credits_low);
        assert!(!merged.alerts.day100);
    }

    #[test]
    fn test_ai_calls_follow_the_window_rule() {
        let mut local = UsageRecord::new(0);
        local.ai_calls = 6;
        local.ai_calls_day_key = "2024-01-02".to_string();
        let mut remote = UsageRecord::new(0);
        remote.ai_calls = 1;
        remote.ai_calls_day_key = "2024-01-03".to_string();
        let merged = merge(&local, &remote);
        assert_eq!(merged.ai_calls, 1);
        assert_eq!(merged.ai_calls_day_key, "2024-01-03");
    }

    #[test]
    fn test_sync_document_strips_credits() {
        let mut record = UsageRecord::new(0);
        record.weather_credits = 9;
        record.baro_credits = 4;
        record.day.count = 2;
        let doc = sync_document(&record);
        assert!(doc.get("weather_credits").is_none());
        assert!(doc.get("baro_credits").is_none());
        assert_eq!(doc["day"]["count"], 2);
    }

    proptest! {
        #[test]
        fn prop_same_key_merge_is_commutative_max(a in 0u32..10_000, b in 0u32..10_000) {
            let local = record_with_day("2024-01-02", a);
            let remote = record_with_day("2024-01-02", b);
            let lr = merge(&local, &remote);
            let rl = merge(&remote, &local);
            prop_assert_eq!(lr.day.count, a.max(b));
            prop_assert_eq!(rl.day.count, a.max(b));
            prop_assert_eq!(lr.day.key.clone(), rl.day.key.clone());
        }

        #[test]
        fn prop_merge_never_loses_a_rollover(
            local_count in 0u32..1000,
            remote_count in 0u32..1000,
            remote_newer in proptest::bool::ANY,
        ) {
            let (lk, rk) = if remote_newer {
                ("2024-01-01", "2024-01-02")
            } else {
                ("2024-01-02", "2024-01-01")
            };
            let local = record_with_day(lk, local_count);
            let remote = record_with_day(rk, remote_count);
            let merged = merge(&local, &remote);
            // Whichever replica holds the newer key defines the window.
            prop_assert_eq!(merged.day.key.clone(), "2024-01-02".to_string());
            if remote_newer {
                prop_assert_eq!(merged.day.count, remote_count);
            } else {
                prop_assert_eq!(merged.day.count, local_count);
            }
        }
    }
}
