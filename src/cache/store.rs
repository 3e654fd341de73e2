//! Backing stores for cached results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use serde::Serialize;

use super::{CacheError, CacheKey};
use crate::execution::ExecutionResult;

/// Which tenant an entry belongs to. Already folded into the key; kept on
/// the entry so stores can report or purge per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantScope {
    pub environment_id: String,
    pub consumer_hash: String,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Arc<ExecutionResult>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub scope: TenantScope,
}

/// Key-value store for cache entries.
///
/// Implementations own expiry and eviction. Errors are reported, never
/// retried: the cache layer treats them as misses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    async fn insert(&self, entry: CacheEntry) -> Result<(), CacheError>;
}

/// Per-entry TTL taken from the entry itself.
struct EntryExpiry;

impl Expiry<CacheKey, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process store: TTL per entry, LRU eviction past `max_entries`.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<CacheKey, CacheEntry>,
}

impl MemoryStore {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and expirations.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn insert(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.cache.insert(entry.key.clone(), entry).await;
        Ok(())
    }
}
