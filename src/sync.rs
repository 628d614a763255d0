//! Background push of local mutations to the remote store.
//!
//! The governor never awaits remote writes on the mutation path; it
//! enqueues operations here and moves on. Failures are logged and
//! swallowed, with one exception: credit increments are retried with
//! jittered backoff, because a lost decrement undercharges the identity
//! forever while a lost counter push is healed by the max-merge at the
//! next sign-in.

use crate::identity::Identity;
use crate::ledger::CreditKind;
use crate::remote::RemoteStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const CREDIT_RETRY_ATTEMPTS: u32 = 5;
const CREDIT_RETRY_BASE_MS: u64 = 250;

enum SyncMsg {
    PushRecord(serde_json::Value),
    IncrementCredit { kind: CreditKind, delta: i64 },
    Flush(oneshot::Sender<()>),
}

/// Handle to the sync worker. Cheap to clone.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncMsg>,
}

impl SyncHandle {
    /// Spawns the worker task for one identity.
    pub fn spawn(identity: Identity, remote: Arc<dyn RemoteStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(identity, remote, rx));
        Self { tx }
    }

    /// Enqueues a whole-record push. The document must already have credit
    /// fields stripped (see `replica::sync_document`).
    pub fn push_record(&self, document: serde_json::Value) {
        let _ = self.tx.send(SyncMsg::PushRecord(document));
    }

    /// Enqueues an atomic credit increment.
    pub fn increment_credit(&self, kind: CreditKind, delta: i64) {
        let _ = self.tx.send(SyncMsg::IncrementCredit { kind, delta });
    }

    /// Waits until every previously enqueued operation has been processed.
    /// Used at shutdown and by deterministic tests.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SyncMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn worker(
    identity: Identity,
    remote: Arc<dyn RemoteStore>,
    mut rx: mpsc::UnboundedReceiver<SyncMsg>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            SyncMsg::PushRecord(document) => {
                if let Err(error) = remote.merge_set(&identity, document).await {
                    tracing::warn!(
                        identity = %identity,
                        error = %error,
                        "remote record push failed; local state stays authoritative"
                    );
                }
            }
            SyncMsg::IncrementCredit { kind, delta } => {
                push_credit_increment(&identity, remote.as_ref(), kind, delta).await;
            }
            SyncMsg::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn push_credit_increment(
    identity: &Identity,
    remote: &dyn RemoteStore,
    kind: CreditKind,
    delta: i64,
) {
    let mut attempt: u32 = 0;
    loop {
        match remote.increment(identity, kind.remote_field(), delta).await {
            Ok(()) => return,
            Err(error) => {
                attempt += 1;
                if attempt >= CREDIT_RETRY_ATTEMPTS {
                    tracing::warn!(
                        identity = %identity,
                        field = kind.remote_field(),
                        delta,
                        error = %error,
                        "dropping credit increment after {} attempts",
                        attempt
                    );
                    return;
                }
                let backoff = CREDIT_RETRY_BASE_MS << attempt.min(6);
                let jitter = rand::thread_rng().gen_range(0..CREDIT_RETRY_BASE_MS);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
        }
    }
}
