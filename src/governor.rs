//! The governor façade: one instance per session, threading identity,
//! record, pacing, and events through every call.

use crate::alerts::{AlertEmitter, UsageEvent};
use crate::cache::LocalCache;
use crate::config::GovernorConfig;
use crate::errors::GovernorError;
use crate::identity::Identity;
use crate::ledger::{self, CreditKind};
use crate::limits;
use crate::queue::RequestQueue;
use crate::record::{self, UsageRecord};
use crate::remote::RemoteStore;
use crate::replica;
use crate::sync::SyncHandle;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Usage governor for one identity.
///
/// Holds the single mutable usage record; every mutation is a synchronous
/// read-modify-write with no intervening await point, then the new state is
/// persisted locally and pushed to the remote store in the background.
pub struct UsageGovernor {
    identity: Identity,
    config: GovernorConfig,
    record: UsageRecord,
    cache: Box<dyn LocalCache>,
    emitter: AlertEmitter,
    queue: RequestQueue,
    sync: SyncHandle,
}

impl UsageGovernor {
    /// Builds the governor for a session, reconciling the local cache with
    /// the remote store.
    ///
    /// The remote fetch is best-effort enrichment: if it fails, the local
    /// record alone drives enforcement and the session proceeds. The daily
    /// top-up runs as part of sign-in.
    pub async fn sign_in(
        identity: Identity,
        config: GovernorConfig,
        cache: Box<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        let local = cache
            .load(&identity)
            .unwrap_or_else(|| UsageRecord::new(now));

        let record = match remote.fetch(&identity).await {
            Ok(Some(remote_record)) => replica::merge(&local, &remote_record),
            Ok(None) => local,
            Err(error) => {
                tracing::warn!(
                    identity = %identity,
                    error = %error,
                    "remote fetch failed; continuing on the local record"
                );
                local
            }
        };

        let sync = SyncHandle::spawn(identity.clone(), remote);
        let queue = RequestQueue::new(config.pacing);
        let emitter = AlertEmitter::new(config.alerts);
        let mut governor = Self {
            identity,
            config,
            record,
            cache,
            emitter,
            queue,
            sync,
        };
        governor.apply_daily_top_up(now);
        governor.finalize_mutation();
        governor
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Synchronous snapshot of the current record.
    pub fn get_usage(&self) -> UsageRecord {
        self.record.clone()
    }

    /// Subscribes to governor events.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.emitter.subscribe()
    }

    /// Read-only gate: checks the record against the effective limits
    /// without mutating anything.
    pub fn check_limit(&self) -> Result<(), GovernorError> {
        let now = Utc::now().timestamp_millis();
        let limits = ledger::effective_limits(&self.record, &self.config);
        limits::check_limit(&self.record, &limits, now)
    }

    /// Records one call against all windows and publishes any alerts.
    pub fn track_call(&mut self) {
        let now = Utc::now().timestamp_millis();
        limits::track_call(&mut self.record, now);
        let limits = ledger::effective_limits(&self.record, &self.config);
        self.emitter.observe(&mut self.record, &limits);
        self.finalize_mutation();
    }

    /// Consumes prepaid credits: decrements the local balance immediately
    /// (clamped at zero) and enqueues the matching atomic remote decrement.
    /// Returns the new local balance.
    pub fn consume_credit(&mut self, kind: CreditKind, amount: u32) -> u32 {
        let balance = ledger::consume(&mut self.record, kind, amount);
        self.sync.increment_credit(kind, -i64::from(amount));
        if kind == CreditKind::Weather {
            self.emitter
                .observe_credits(&mut self.record, &self.config.credits);
        }
        self.finalize_mutation();
        balance
    }

    /// Records one AI call against the per-day AI counter.
    pub fn track_ai_call(&mut self) -> u32 {
        let now = Utc::now().timestamp_millis();
        let today = record::day_key(now);
        if self.record.ai_calls_day_key == today {
            self.record.ai_calls += 1;
        } else {
            self.record.ai_calls = 1;
            self.record.ai_calls_day_key = today;
        }
        self.finalize_mutation();
        self.record.ai_calls
    }

    /// Runs the once-per-day maintenance pass. Safe to call at any time;
    /// the day-key guard makes re-runs no-ops.
    pub fn daily_top_up(&mut self) {
        let now = Utc::now().timestamp_millis();
        if self.apply_daily_top_up(now) {
            self.finalize_mutation();
        }
    }

    /// Submits a call through the serial pacing lane.
    ///
    /// The limit check and call tracking happen synchronously here, before
    /// the network result is known; the returned future resolves with the
    /// call's own result once the lane has paced and run it. Returns
    /// `LimitExceeded` immediately without enqueueing when a window is
    /// saturated.
    pub fn submit<T, F>(
        &mut self,
        call: F,
    ) -> Result<impl Future<Output = Result<T, GovernorError>> + Send + 'static, GovernorError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, GovernorError>> + Send + 'static,
    {
        self.check_limit()?;
        self.track_call();
        Ok(self.queue.run(call))
    }

    /// Administrative reset: re-initializes counters and alert flags.
    /// Credits survive unless `zero_credits` is set.
    pub fn admin_reset(&mut self, zero_credits: bool) {
        let now = Utc::now().timestamp_millis();
        self.record.reset(now, zero_credits);
        self.finalize_mutation();
    }

    /// Drains the background sync queue. Call before shutdown, or from
    /// tests that need the remote store settled.
    pub async fn flush(&self) {
        self.sync.flush().await;
    }

    fn apply_daily_top_up(&mut self, now_ms: i64) -> bool {
        let before = self.record.day.key.clone();
        if let Some(delta) = ledger::daily_top_up(&mut self.record, &self.config.credits, now_ms)
        {
            self.sync.increment_credit(CreditKind::Weather, i64::from(delta));
            return true;
        }
        before != self.record.day.key
    }

    fn finalize_mutation(&mut self) {
        if let Err(error) = self.cache.store(&self.identity, &self.record) {
            tracing::warn!(
                identity = %self.identity,
                error = %error,
                "failed to persist usage record locally; in-memory state unchanged"
            );
        }
        self.sync.push_record(replica::sync_document(&self.record));
        self.emitter.publish(UsageEvent::Updated);
    }
}

#[cfg(test)]
#[path = "tests/governor_tests.rs"]
mod tests;
