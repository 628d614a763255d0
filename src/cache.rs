//! Local cache of the usage record: fast, synchronous, always available.
//!
//! The cache is the optimistic replica; every governor mutation lands here
//! first, and the remote store catches up asynchronously. Storage is one
//! JSON file per identity under `~/.usage-governor/`, with an advisory file
//! lock against concurrent processes on the same machine.

use crate::identity::Identity;
use crate::record::UsageRecord;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const CACHE_DIR: &str = ".usage-governor";

/// Synchronous key-value cache holding one serialized record per identity.
pub trait LocalCache: Send {
    /// Loads the cached record, or `None` if absent or unreadable. A corrupt
    /// cache entry is treated as absent; the governor starts fresh.
    fn load(&self, identity: &Identity) -> Option<UsageRecord>;

    /// Stores the record, replacing any previous entry.
    fn store(&mut self, identity: &Identity, record: &UsageRecord) -> Result<()>;
}

/// File-backed cache under the home directory.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Opens a cache rooted at an explicit directory, creating it if needed.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Opens the default cache at `~/.usage-governor/`.
    pub fn open_default() -> Result<Self> {
        let home = resolve_home()?;
        Self::new(home.join(CACHE_DIR))
    }

    fn record_path(&self, identity: &Identity) -> PathBuf {
        self.dir.join(format!("{}.json", identity.storage_key()))
    }
}

impl LocalCache for FileCache {
    fn load(&self, identity: &Identity) -> Option<UsageRecord> {
        let content = fs::read_to_string(self.record_path(identity)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn store(&mut self, identity: &Identity, record: &UsageRecord) -> Result<()> {
        let path = self.record_path(identity);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open cache file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock cache file: {}", path.display()))?;
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize usage record")?;
        let result = file
            .set_len(0)
            .and_then(|_| file.write_all(content.as_bytes()))
            .with_context(|| format!("Failed to write cache file: {}", path.display()));
        let _ = file.unlock();
        result
    }
}

/// In-memory cache for tests and ephemeral hosts.
///
/// Clones share the same backing map, so a test can hand the governor one
/// handle and inspect writes through another.
#[derive(Clone, Default)]
pub struct MemoryCache {
    records: Arc<Mutex<HashMap<String, UsageRecord>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn load(&self, identity: &Identity) -> Option<UsageRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(identity.storage_key()).cloned())
    }

    fn store(&mut self, identity: &Identity, record: &UsageRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("cache map poisoned"))?;
        records.insert(identity.storage_key().to_string(), record.clone());
        Ok(())
    }
}

fn resolve_home() -> Result<PathBuf> {
    #[cfg(test)]
    {
        if let Some(path) = test_home::get() {
            return Ok(path);
        }
    }
    dirs::home_dir().context("Could not determine home directory for the usage cache")
}

#[cfg(test)]
pub(crate) mod test_home {
    //! Home-directory override so tests never touch the real home.

    use std::path::PathBuf;
    use std::sync::Mutex;

    static OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

    /// Guard that clears the override when dropped. Tests using this must be
    /// `#[serial]` because the override is process-global.
    pub struct TestHomeGuard;

    impl Drop for TestHomeGuard {
        fn drop(&mut self) {
            if let Ok(mut guard) = OVERRIDE.lock() {
                *guard = None;
            }
        }
    }

    pub fn set_home_for_test(path: PathBuf) -> TestHomeGuard {
        if let Ok(mut guard) = OVERRIDE.lock() {
            *guard = Some(path);
        }
        TestHomeGuard
    }

    pub(super) fn get() -> Option<PathBuf> {
        OVERRIDE.lock().ok().and_then(|guard| guard.clone())
    }
}
