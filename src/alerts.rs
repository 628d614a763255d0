//! Threshold alerts published over a broadcast channel.
//!
//! Each scope runs the state machine `NotWarned -> Warned80 -> Warned100`;
//! every forward transition publishes exactly one event. Day/month stages
//! persist as flags on the record so a crossing survives restarts and
//! replica merges; minute/hour stages are transient and reset when their
//! window rolls over.

use crate::config::{AlertFractions, CreditParams, LimitsTable};
use crate::ledger;
use crate::limits::Scope;
use crate::record::UsageRecord;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events published by the governor. Subscribers are unknown to the
/// emitter; delivery is best-effort publish/subscribe.
#[derive(Debug, Clone)]
pub enum UsageEvent {
    /// The record changed in some way.
    Updated,
    /// A window crossed the warning fraction of its limit.
    Warning {
        scope: Scope,
        snapshot: UsageRecord,
        limits: LimitsTable,
    },
    /// A window reached its limit.
    LimitReached { scope: Scope, limit: u32 },
    /// The primary credit balance dropped to the low threshold.
    CreditsLow { balance: u32 },
}

/// Transient per-window stage for the rolling scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct TransientStage {
    warned80: bool,
    warned100: bool,
    /// Window start this stage belongs to; a different start means the
    /// window rolled over and the stage resets.
    anchor_ms: i64,
}

impl TransientStage {
    fn rollover(&mut self, anchor_ms: i64) {
        if self.anchor_ms != anchor_ms {
            self.warned80 = false;
            self.warned100 = false;
            self.anchor_ms = anchor_ms;
        }
    }
}

/// Publishes at-most-once-per-crossing alerts for every scope.
pub struct AlertEmitter {
    tx: broadcast::Sender<UsageEvent>,
    fractions: AlertFractions,
    minute: TransientStage,
    hour: TransientStage,
}

impl AlertEmitter {
    pub fn new(fractions: AlertFractions) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            fractions,
            minute: TransientStage::default(),
            hour: TransientStage::default(),
        }
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: UsageEvent) {
        // No subscribers is normal; delivery is best-effort.
        let _ = self.tx.send(event);
    }

    /// Observes the record after a tracked call and publishes any threshold
    /// crossings. Day/month crossings are written back to the record's
    /// persisted flags.
    pub fn observe(&mut self, record: &mut UsageRecord, limits: &LimitsTable) {
        self.minute.rollover(record.minute.start_ms);
        let (warn, limit) = crossings(
            record.minute.count,
            limits.minute,
            &self.fractions,
            self.minute.warned80,
            self.minute.warned100,
        );
        self.minute.warned80 |= warn;
        self.minute.warned100 |= limit;
        self.publish_crossings(Scope::Minute, warn, limit, record, limits, limits.minute);

        self.hour.rollover(record.hour.start_ms);
        let (warn, limit) = crossings(
            record.hour.count,
            limits.hour,
            &self.fractions,
            self.hour.warned80,
            self.hour.warned100,
        );
        self.hour.warned80 |= warn;
        self.hour.warned100 |= limit;
        self.publish_crossings(Scope::Hour, warn, limit, record, limits, limits.hour);

        let (warn, limit) = crossings(
            record.day.count,
            limits.day,
            &self.fractions,
            record.alerts.day80,
            record.alerts.day100,
        );
        record.alerts.day80 |= warn;
        record.alerts.day100 |= limit;
        self.publish_crossings(Scope::Day, warn, limit, record, limits, limits.day);

        let (warn, limit) = crossings(
            record.month.count,
            limits.month,
            &self.fractions,
            record.alerts.month80,
            record.alerts.month100,
        );
        record.alerts.month80 |= warn;
        record.alerts.month100 |= limit;
        self.publish_crossings(Scope::Month, warn, limit, record, limits, limits.month);
    }

    /// Observes the credit balances after a consume and publishes the
    /// one-shot low-credit alert on the crossing.
    pub fn observe_credits(&self, record: &mut UsageRecord, params: &CreditParams) {
        if ledger::is_low(record, params) && !record.alerts.credits_low {
            record.alerts.credits_low = true;
            self.publish(UsageEvent::CreditsLow {
                balance: record.weather_credits,
            });
        }
    }

    fn publish_crossings(
        &self,
        scope: Scope,
        warn: bool,
        limit: bool,
        record: &UsageRecord,
        limits: &LimitsTable,
        limit_value: u32,
    ) {
        if warn {
            self.publish(UsageEvent::Warning {
                scope,
                snapshot: record.clone(),
                limits: *limits,
            });
        }
        if limit {
            self.publish(UsageEvent::LimitReached {
                scope,
                limit: limit_value,
            });
        }
    }
}

/// Computes which forward transitions a count/limit pair triggers given the
/// already-reached stages. A zero limit never alerts; it is enforced by the
/// limit check alone.
fn crossings(
    count: u32,
    limit: u32,
    fractions: &AlertFractions,
    warned80: bool,
    warned100: bool,
) -> (bool, bool) {
    if limit == 0 {
        return (false, false);
    }
    let ratio = f64::from(count) / f64::from(limit);
    let warn = !warned80 && ratio >= fractions.warn;
    let reached = !warned100 && ratio >= fractions.limit;
    (warn, reached)
}
