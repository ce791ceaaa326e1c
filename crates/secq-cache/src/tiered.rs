//! Mirror + durable cache composition.

use crate::entry::{CacheEntry, CacheKey};
use crate::memory::MemoryStore;
use crate::store::CacheStore;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// An in-memory mirror in front of an optional durable store.
///
/// Reads check the mirror first and fall back to the durable store, copying
/// hits into the mirror. Writes land in the mirror immediately; the durable
/// write runs in the background and may lag behind what other callers see.
/// Durable failures are logged and otherwise ignored: a failed read is a miss,
/// a failed write only means the entry will not survive a restart.
#[derive(Debug, Clone)]
pub struct TieredCache {
    mirror: Arc<MemoryStore>,
    durable: Option<Arc<dyn CacheStore>>,
    writes: TaskTracker,
}

impl TieredCache {
    /// Cache backed by `durable`.
    pub fn new(durable: Arc<dyn CacheStore>) -> Self {
        Self {
            mirror: Arc::new(MemoryStore::new()),
            durable: Some(durable),
            writes: TaskTracker::new(),
        }
    }

    /// Cache without a durable tier.
    pub fn memory_only() -> Self {
        Self {
            mirror: Arc::new(MemoryStore::new()),
            durable: None,
            writes: TaskTracker::new(),
        }
    }

    /// Look up an entry in the mirror, then the durable store.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.mirror.lookup(key) {
            debug!(%key, "mirror hit");
            return Some(entry);
        }

        let entry = self.read_durable(key).await?;
        debug!(%key, "durable hit");
        self.mirror.insert(key.clone(), entry.clone());
        Some(entry)
    }

    /// Look up an entry in the durable store only, or in the mirror when
    /// there is no durable tier. Does not populate the mirror.
    pub async fn get_durable(&self, key: &CacheKey) -> Option<CacheEntry> {
        if self.durable.is_none() {
            return self.mirror.lookup(key);
        }
        self.read_durable(key).await
    }

    async fn read_durable(&self, key: &CacheKey) -> Option<CacheEntry> {
        let durable = self.durable.as_ref()?;
        match durable.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "durable cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store an entry in both tiers.
    ///
    /// Must be called from within a tokio runtime when a durable tier exists.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        self.mirror.insert(key.clone(), entry.clone());

        if let Some(durable) = &self.durable {
            let durable = Arc::clone(durable);
            self.writes.spawn(async move {
                if let Err(e) = durable.set(&key, &entry).await {
                    warn!(%key, error = %e, "durable cache write failed");
                }
            });
        }
    }

    /// Remove an entry from both tiers.
    pub async fn remove(&self, key: &CacheKey) {
        self.mirror.evict(key);
        if let Some(durable) = &self.durable
            && let Err(e) = durable.remove(key).await
        {
            warn!(%key, error = %e, "durable cache remove failed");
        }
    }

    /// Empty both tiers.
    pub async fn clear(&self) {
        self.mirror.purge();
        self.flush().await;
        if let Some(durable) = &self.durable
            && let Err(e) = durable.clear().await
        {
            warn!(error = %e, "durable cache clear failed");
        }
    }

    /// Wait for pending durable writes to finish.
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Number of entries held in the mirror.
    pub fn mirror_len(&self) -> usize {
        self.mirror.len()
    }

    /// Number of entries in the durable store, if there is one and it can be read.
    pub async fn durable_len(&self) -> Option<usize> {
        let durable = self.durable.as_ref()?;
        match durable.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "durable cache count failed");
                None
            }
        }
    }

    /// Returns true if a durable tier is configured.
    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }
}
