//! Credit ledger: optimistic local balances backed by the remote store.
//!
//! Consumption is the only path allowed to change a balance. The bulk record
//! sync strips credit fields before writing (see the replica module), so a
//! stale bulk write can never resurrect a spent balance.

use crate::config::{CreditParams, GovernorConfig, LimitsTable};
use crate::record::{day_key, UsageRecord};
use serde::{Deserialize, Serialize};

/// The two prepaid credit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditKind {
    /// Primary credits; a positive balance unlocks the PRO rate table.
    Weather,
    /// Secondary credits.
    Baro,
}

impl CreditKind {
    /// Field name of this balance in the remote document, used for atomic
    /// server-side increments.
    pub fn remote_field(&self) -> &'static str {
        match self {
            Self::Weather => "weather_credits",
            Self::Baro => "baro_credits",
        }
    }
}

/// Current local balance for a credit type.
pub fn balance(record: &UsageRecord, kind: CreditKind) -> u32 {
    match kind {
        CreditKind::Weather => record.weather_credits,
        CreditKind::Baro => record.baro_credits,
    }
}

/// Decrements a local balance, saturating at zero. Returns the new balance.
///
/// The caller is responsible for enqueueing the matching remote increment of
/// `-amount`; the remote side is authoritative and multiple devices may race,
/// so the remote change must be a server-side atomic increment.
pub fn consume(record: &mut UsageRecord, kind: CreditKind, amount: u32) -> u32 {
    let slot = match kind {
        CreditKind::Weather => &mut record.weather_credits,
        CreditKind::Baro => &mut record.baro_credits,
    };
    *slot = slot.saturating_sub(amount);
    *slot
}

/// Whether the primary balance is at or below the low-credit threshold.
pub fn is_low(record: &UsageRecord, params: &CreditParams) -> bool {
    record.weather_credits <= params.low_credit_threshold
}

/// Runs the once-per-day maintenance pass.
///
/// When the record's day key differs from today's, the day counter and its
/// alert flags reset, and the primary balance is refilled up to the free
/// daily allowance (bounded by the daily cap). Returns the refill delta so
/// the caller can enqueue the identical remote increment, or `None` when the
/// day key is unchanged. The key comparison itself makes a re-run a no-op.
pub fn daily_top_up(
    record: &mut UsageRecord,
    params: &CreditParams,
    now_ms: i64,
) -> Option<u32> {
    let today = day_key(now_ms);
    if record.day.key == today {
        return None;
    }

    record.day.count = 0;
    record.day.key = today;
    record.alerts.day80 = false;
    record.alerts.day100 = false;

    let target = params.free_daily_allowance.min(params.max_daily_cap);
    let delta = target.saturating_sub(record.weather_credits);
    if delta == 0 {
        return None;
    }

    record.weather_credits += delta;
    if !is_low(record, params) {
        record.alerts.credits_low = false;
    }
    Some(delta)
}

/// Returns the limits table the record is currently entitled to: the PRO
/// table while the primary balance is positive, the FREE table otherwise.
pub fn effective_limits(record: &UsageRecord, config: &GovernorConfig) -> LimitsTable {
    if record.weather_credits > 0 {
        config.limits_for(config.tiers.pro)
    } else {
        config.limits_for(config.tiers.free)
    }
}
