//! Authority data manager.
//!
//! [`AuthorityDataManager`] is the single owner of the cache, the durable
//! store, the write queue and the schema registry. Exactly one process
//! constructs it; every other process reaches it through the RPC bridge.
//!
//! Read path: cache hit, else durable row → `process` → cache (with any
//! pending fields laid over it). Write path: merge into the cache right away
//! and persist through the write queue. Explicit callers see durable-store
//! failures as [`StoreError::Store`]; only the background flush loop
//! swallows and retries them.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::cache::{CacheStatsSnapshot, CacheStore, MokaCacheStore};
use crate::config::AuthorityConfig;
use crate::db::Database;
use crate::durable::{DurableStore, MemoryStore, SqliteStore};
use crate::entity::{Entity, EntityRef};
use crate::error::{StoreError, StoreResult};
use crate::queue::{FlushLoop, FlushReport, QueueStatsSnapshot, WriteQueue};
use crate::schema::SchemaRegistry;

/// Point-in-time view of the authority's internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityStats {
    /// Rows waiting for the next flush.
    pub pending: usize,
    /// Write queue counters.
    pub queue: QueueStatsSnapshot,
    /// Cache counters, when the cache keeps them.
    pub cache: Option<CacheStatsSnapshot>,
    /// Registered collections.
    pub collections: Vec<String>,
}

/// The process-wide data API.
pub struct AuthorityDataManager {
    registry: SchemaRegistry,
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn DurableStore>,
    queue: Arc<WriteQueue>,
    config: AuthorityConfig,
    local_cache: Option<MokaCacheStore>,
    flusher: Mutex<Option<FlushLoop>>,
}

impl AuthorityDataManager {
    /// Assemble a manager from explicit adapters.
    pub fn new(
        registry: SchemaRegistry,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn DurableStore>,
        config: AuthorityConfig,
    ) -> Self {
        let queue = Arc::new(WriteQueue::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            config.cache_ttl,
        ));
        Self {
            registry,
            cache,
            store,
            queue,
            config,
            local_cache: None,
            flusher: Mutex::new(None),
        }
    }

    /// Open the SQLite store at `path` with an in-process moka cache.
    pub async fn open(
        path: impl AsRef<Path> + Send + 'static,
        registry: SchemaRegistry,
        config: AuthorityConfig,
    ) -> StoreResult<Self> {
        let db = Database::open_and_migrate(path).await?;
        Ok(Self::with_local_cache(
            registry,
            Arc::new(SqliteStore::new(db)),
            config,
        ))
    }

    /// Fully in-memory manager (memory store + moka cache).
    pub fn in_memory(registry: SchemaRegistry, config: AuthorityConfig) -> Self {
        Self::with_local_cache(registry, Arc::new(MemoryStore::new()), config)
    }

    /// Use `store` behind an in-process moka cache sized from `config`.
    pub fn with_local_cache(
        registry: SchemaRegistry,
        store: Arc<dyn DurableStore>,
        config: AuthorityConfig,
    ) -> Self {
        let moka = MokaCacheStore::builder()
            .max_capacity(config.cache_capacity)
            .build();
        let mut manager = Self::new(registry, Arc::new(moka.clone()), store, config);
        manager.local_cache = Some(moka);
        manager
    }

    // ── data API ─────────────────────────────────────────────────────

    /// Read an entity. Returns `None` if it exists nowhere.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn fetch(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
    ) -> StoreResult<Option<Entity>> {
        let target = target.into();
        self.registry.get(collection)?;
        let id = target.id();

        if let Some(hit) = self.cache_get(collection, id).await {
            return Ok(Some(hit));
        }

        let raw = self
            .store
            .select_by_id(collection, id)
            .await
            .map_err(|e| StoreError::store(collection, e))?;

        let loaded = match raw {
            Some(row) => row,
            // Created but never flushed, and evicted from the cache since.
            None => match self.queue.pending_write(collection, id) {
                Some(pending) => Entity {
                    id: id.to_string(),
                    fields: pending.patch,
                },
                None => return Ok(None),
            },
        };

        let normalized = self.registry.normalize(collection, loaded)?;
        Ok(Some(self.queue.load_through(collection, normalized).await))
    }

    /// Read an entity, creating it from the collection template on a miss.
    ///
    /// A created entity is queued for persistence, so it becomes durable
    /// without a separate write.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn fetch_or_create(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
    ) -> StoreResult<Entity> {
        let target = target.into();
        if let Some(existing) = self.fetch(collection, target.clone()).await? {
            return Ok(existing);
        }

        let created = self.registry.instantiate(collection, target.id())?;
        info!(collection, id = %created.id, "entity created from template");
        Ok(self.queue.enqueue(collection, created).await)
    }

    /// Merge `patch` into the entity and return the merged value.
    ///
    /// Creates the entity from its template first if it does not exist.
    /// Derived fields are recomputed, so the result matches what a reload
    /// from the store would produce.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn update(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
        patch: &Map<String, Value>,
    ) -> StoreResult<Entity> {
        let schema = self.registry.get(collection)?;
        let base = self.fetch_or_create(collection, target).await?;
        Ok(self
            .queue
            .update_normalized(collection, base, patch, schema.as_ref())
            .await)
    }

    /// Delete an entity from cache, pending writes and the durable store.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn remove(&self, collection: &str, target: impl Into<EntityRef>) -> StoreResult<()> {
        let target = target.into();
        self.registry.get(collection)?;
        self.queue
            .remove(collection, target.id())
            .await
            .map_err(|e| StoreError::store(collection, e))
    }

    /// Flush pending writes now.
    pub async fn flush(&self) -> FlushReport {
        self.queue.flush().await
    }

    /// Whether the entity has writes the durable store has not seen yet.
    pub fn is_dirty(&self, collection: &str, id: &str) -> bool {
        self.queue.is_dirty(collection, id)
    }

    /// Generation of the newest unflushed write, if any.
    pub fn pending_generation(&self, collection: &str, id: &str) -> Option<u64> {
        self.queue.pending_write(collection, id).map(|w| w.generation)
    }

    /// Snapshot of queue and cache counters.
    pub fn stats(&self) -> AuthorityStats {
        AuthorityStats {
            pending: self.queue.pending_count(),
            queue: self.queue.stats().snapshot(),
            cache: self.local_cache.as_ref().map(|c| c.stats().snapshot()),
            collections: self.registry.collections(),
        }
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The write queue.
    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Start the background flush loop. Calling it twice is a no-op.
    pub async fn start(&self) {
        let mut flusher = self.flusher.lock().await;
        if flusher.is_none() {
            *flusher = Some(FlushLoop::start(
                Arc::clone(&self.queue),
                self.config.flush_interval,
            ));
        }
    }

    /// Stop the flush loop, drain the queue one last time, then checkpoint
    /// the durable store.
    pub async fn shutdown(&self) -> StoreResult<FlushReport> {
        if let Some(flusher) = self.flusher.lock().await.take() {
            flusher.stop().await?;
        }
        let report = self.queue.flush().await;
        if let Err(err) = self.store.checkpoint().await {
            warn!(%err, "store checkpoint failed");
        }
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                "shutdown flush left writes unpersisted"
            );
        } else {
            info!(flushed = report.flushed, "authority shut down cleanly");
        }
        Ok(report)
    }

    async fn cache_get(&self, collection: &str, id: &str) -> Option<Entity> {
        match self.cache.get(collection, id).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(collection, id, %err, "cache unavailable, treating as miss");
                None
            }
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
