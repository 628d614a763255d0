//! Pure window-counter logic: limit checks and call tracking.

use crate::config::LimitsTable;
use crate::errors::GovernorError;
use crate::record::{day_key, month_key, UsageRecord, HOUR_MS, MINUTE_MS};
use serde::{Deserialize, Serialize};

/// The four count windows a call is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Minute,
    Hour,
    Day,
    Month,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::Month => write!(f, "month"),
        }
    }
}

/// Checks the record against every window limit without mutating anything.
///
/// A window only blocks while the record is still inside it; an expired
/// window passes regardless of its stale count, since the next track resets
/// it anyway.
pub fn check_limit(
    record: &UsageRecord,
    limits: &LimitsTable,
    now_ms: i64,
) -> Result<(), GovernorError> {
    if record.minute.is_active(MINUTE_MS, now_ms) && record.minute.count >= limits.minute {
        return Err(GovernorError::LimitExceeded {
            scope: Scope::Minute,
            limit: limits.minute,
        });
    }
    if record.hour.is_active(HOUR_MS, now_ms) && record.hour.count >= limits.hour {
        return Err(GovernorError::LimitExceeded {
            scope: Scope::Hour,
            limit: limits.hour,
        });
    }
    if record.day.key == day_key(now_ms) && record.day.count >= limits.day {
        return Err(GovernorError::LimitExceeded {
            scope: Scope::Day,
            limit: limits.day,
        });
    }
    if record.month.key == month_key(now_ms) && record.month.count >= limits.month {
        return Err(GovernorError::LimitExceeded {
            scope: Scope::Month,
            limit: limits.month,
        });
    }
    Ok(())
}

/// Records one call against all four windows, rolling over any window the
/// current time has left.
///
/// Calendar rollovers also clear that window's persisted alert flags; this
/// is the only place those flags reset.
pub fn track_call(record: &mut UsageRecord, now_ms: i64) {
    record.total_calls += 1;

    if record.minute.is_active(MINUTE_MS, now_ms) {
        record.minute.count += 1;
    } else {
        record.minute.count = 1;
        record.minute.start_ms = now_ms;
    }

    if record.hour.is_active(HOUR_MS, now_ms) {
        record.hour.count += 1;
    } else {
        record.hour.count = 1;
        record.hour.start_ms = now_ms;
    }

    let today = day_key(now_ms);
    if record.day.key == today {
        record.day.count += 1;
    } else {
        record.day.count = 1;
        record.day.key = today;
        record.alerts.day80 = false;
        record.alerts.day100 = false;
    }

    let this_month = month_key(now_ms);
    if record.month.key == this_month {
        record.month.count += 1;
    } else {
        record.month.count = 1;
        record.month.key = this_month;
        record.alerts.month80 = false;
        record.alerts.month100 = false;
    }
}
