//! Cache store adapter.
//!
//! [`CacheStore`] is the read-through/write-through key-value cache in front
//! of the durable store. Entries are keyed by `collection:id` and expire
//! after a per-entry TTL that is refreshed on every `set`.
//!
//! The in-process implementation, [`MokaCacheStore`], is backed by
//! `moka::future::Cache`. Remote caches can implement the trait and report
//! outages as [`StoreError::CacheUnavailable`](crate::error::StoreError::CacheUnavailable); the authority treats those as
//! misses.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::Entity;
use crate::error::StoreResult;

/// Default entry lifetime: 30 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Build the cache key for an entity.
pub fn cache_key(collection: &str, id: &str) -> String {
    format!("{collection}:{id}")
}

/// Key-value cache with TTL, addressed by collection and id.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a cached entity.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Entity>>;

    /// Insert or replace an entity, (re)starting its TTL.
    async fn set(&self, collection: &str, id: &str, entity: &Entity, ttl: Duration)
    -> StoreResult<()>;

    /// Evict an entity.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;
}

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Total cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0 (0.0 if there were no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0,
        )
    }
}

/// Serializable copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
}

// ── moka-backed store ────────────────────────────────────────────────

#[derive(Clone)]
struct CachedEntity {
    entity: Arc<Entity>,
    ttl: Duration,
}

/// Applies each entry's own TTL on insert and on replace.
struct PerEntryTtl;

impl Expiry<String, CachedEntity> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntity,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedEntity,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache backed by `moka::future::Cache`.
#[derive(Clone)]
pub struct MokaCacheStore {
    inner: Cache<String, CachedEntity>,
    stats: Arc<CacheStats>,
}

impl MokaCacheStore {
    /// Start building a new cache.
    pub fn builder() -> MokaCacheStoreBuilder {
        MokaCacheStoreBuilder {
            max_capacity: 100_000,
        }
    }

    /// Hit/miss counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for MokaCacheStore {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Entity>> {
        let key = cache_key(collection, id);
        match self.inner.get(&key).await {
            Some(cached) => {
                self.stats.record_hit();
                debug!(key = %key, "cache hit");
                Ok(Some(cached.entity.as_ref().clone()))
            }
            None => {
                self.stats.record_miss();
                debug!(key = %key, "cache miss");
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        entity: &Entity,
        ttl: Duration,
    ) -> StoreResult<()> {
        let key = cache_key(collection, id);
        let cached = CachedEntity {
            entity: Arc::new(entity.clone()),
            ttl,
        };
        self.inner.insert(key.clone(), cached).await;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let key = cache_key(collection, id);
        self.inner.invalidate(&key).await;
        debug!(key = %key, "cache delete");
        Ok(())
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`MokaCacheStore`].
pub struct MokaCacheStoreBuilder {
    max_capacity: u64,
}

impl MokaCacheStoreBuilder {
    /// Maximum number of entries the cache will hold.
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    /// Build the cache.
    pub fn build(self) -> MokaCacheStore {
        let inner = Cache::builder()
            .max_capacity(self.max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        debug!(max_capacity = self.max_capacity, "entity cache created");

        MokaCacheStore {
            inner,
            stats: Arc::new(CacheStats::default()),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
