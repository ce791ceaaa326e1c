//! In-process cache store.

use crate::entry::{CacheEntry, CacheKey};
use crate::error::Result;
use crate::store::CacheStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A `HashMap` store that lives for the lifetime of the process.
///
/// Serves as the mirror tier of [`TieredCache`](crate::TieredCache) and as a
/// stand-in durable store in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Synchronous lookup.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries().get(key).cloned()
    }

    /// Synchronous insert or replace.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        self.entries().insert(key, entry);
    }

    /// Synchronous removal.
    pub fn evict(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries().remove(key)
    }

    /// Drop all entries.
    pub fn purge(&self) {
        self.entries().clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        self.insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.evict(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.purge();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }
}
