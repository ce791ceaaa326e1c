//! The durable store contract.

use crate::entry::{CacheEntry, CacheKey};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Async key/value persistence for cache entries.
///
/// Implementations only store and return entries; they never judge freshness.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Look up an entry.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert or replace an entry.
    async fn set(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()>;

    /// Delete an entry if present.
    async fn remove(&self, key: &CacheKey) -> Result<()>;

    /// Delete every entry owned by this store.
    async fn clear(&self) -> Result<()>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;
}
