//! The remote document store the governor syncs against.

use crate::identity::Identity;
use crate::record::UsageRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Authoritative remote store for usage records.
///
/// Implementations wrap whatever document database the host uses. The
/// governor only needs three primitives: whole-document fetch, merge-set of
/// a partial document, and an atomic server-side field increment. The
/// increment must be atomic on the server because multiple devices for one
/// identity may race; client read-modify-write is not acceptable for
/// credit balances.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the stored record, or `None` if the identity has no document.
    async fn fetch(&self, identity: &Identity) -> Result<Option<UsageRecord>>;

    /// Merges the given fields into the stored document, creating it if
    /// absent. Fields not present in `document` are left untouched.
    async fn merge_set(&self, identity: &Identity, document: serde_json::Value) -> Result<()>;

    /// Atomically adds `delta` to a numeric field, creating the document
    /// if absent. Balances clamp at zero server-side.
    async fn increment(&self, identity: &Identity, field: &str, delta: i64) -> Result<()>;
}

/// In-memory `RemoteStore` used by the test suite and host prototypes.
///
/// Supports scripted failure injection so callers can exercise the
/// governor's fail-open paths.
#[derive(Default)]
pub struct MemoryRemote {
    documents: Mutex<HashMap<String, serde_json::Value>>,
    fetch_failures: AtomicU32,
    increment_failures: AtomicU32,
    merge_failures: AtomicU32,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` fetch calls fail.
    pub fn fail_next_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` increment calls fail.
    pub fn fail_next_increments(&self, n: u32) {
        self.increment_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` merge-set calls fail.
    pub fn fail_next_merges(&self, n: u32) {
        self.merge_failures.store(n, Ordering::SeqCst);
    }

    /// Seeds a full record for an identity.
    pub fn put_record(&self, identity: &Identity, record: &UsageRecord) {
        let value = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(identity.storage_key().to_string(), value);
        }
    }

    /// Returns the raw stored document for inspection.
    pub fn document(&self, identity: &Identity) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(identity.storage_key()).cloned())
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch(&self, identity: &Identity) -> Result<Option<UsageRecord>> {
        if Self::take_failure(&self.fetch_failures) {
            anyhow::bail!("injected fetch failure");
        }
        let document = self.document(identity);
        match document {
            Some(value) => {
                let record: UsageRecord =
                    serde_json::from_value(value).context("Failed to parse stored record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn merge_set(&self, identity: &Identity, document: serde_json::Value) -> Result<()> {
        if Self::take_failure(&self.merge_failures) {
            anyhow::bail!("injected merge failure");
        }
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| anyhow::anyhow!("document store poisoned"))?;
        let entry = documents
            .entry(identity.storage_key().to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let (serde_json::Value::Object(stored), serde_json::Value::Object(incoming)) =
            (entry, document)
        {
            for (key, value) in incoming {
                stored.insert(key, value);
            }
        }
        Ok(())
    }

    async fn increment(&self, identity: &Identity, field: &str, delta: i64) -> Result<()> {
        if Self::take_failure(&self.increment_failures) {
            anyhow::bail!("injected increment failure");
        }
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| anyhow::anyhow!("document store poisoned"))?;
        let entry = documents
            .entry(identity.storage_key().to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(stored) = entry {
            let current = stored.get(field).and_then(|v| v.as_i64()).unwrap_or(0);
            let updated = (current + delta).max(0);
            stored.insert(field.to_string(), serde_json::Value::from(updated));
        }
        Ok(())
    }
}
