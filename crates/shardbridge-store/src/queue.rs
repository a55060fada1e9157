//! Write-behind queue.
//!
//! [`WriteQueue`] applies every write to the cache immediately and records
//! the touched fields in a pending map keyed by `(collection, id)`. A
//! background [`FlushLoop`] periodically upserts the pending rows into the
//! durable store. A failed upsert stays pending and is retried on the next
//! tick, merged with any newer writes; one id's failure never blocks others.
//!
//! ## Locking
//!
//! - `gate` serializes every cache write made through the queue, so writes to
//!   the same id apply in arrival order.
//! - `flush_lock` makes a flush pass and a removal mutually exclusive, so an
//!   upsert already in flight cannot resurrect a removed entity.
//! - `pending` is a plain mutex that is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::durable::DurableStore;
use crate::entity::{Entity, EntityRef, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::schema::EntitySchema;

/// Unflushed fields for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Fully merged value of every top-level field written since the last
    /// successful flush.
    pub patch: Map<String, Value>,
    /// Generation of the most recent write folded into `patch`.
    pub generation: u64,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub attempted: usize,
    pub flushed: usize,
    pub failed: usize,
}

/// Lifetime counters for the queue.
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    flushed: AtomicU64,
    failed: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn flushed(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            enqueued: self.enqueued(),
            flushed: self.flushed(),
            failed: self.failed(),
        }
    }
}

/// Serializable copy of [`QueueStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub flushed: u64,
    pub failed: u64,
}

type PendingMap = HashMap<String, HashMap<String, PendingWrite>>;

/// In-memory write-behind queue.
pub struct WriteQueue {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn DurableStore>,
    ttl: Duration,
    pending: Mutex<PendingMap>,
    gate: tokio::sync::Mutex<()>,
    flush_lock: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
    stats: QueueStats,
}

impl WriteQueue {
    /// Create a queue writing through `cache` and flushing into `store`.
    pub fn new(cache: Arc<dyn CacheStore>, store: Arc<dyn DurableStore>, ttl: Duration) -> Self {
        Self {
            cache,
            store,
            ttl,
            pending: Mutex::new(HashMap::new()),
            gate: tokio::sync::Mutex::new(()),
            flush_lock: tokio::sync::Mutex::new(()),
            next_generation: AtomicU64::new(1),
            stats: QueueStats::default(),
        }
    }

    /// Merge `patch` onto the current value of the entity and return it.
    ///
    /// The base is the cached entity; on a cache miss it is the entity passed
    /// in `target`, or a bare entity carrying any pending fields. The merged
    /// result is cached before returning, and the merged values of the
    /// touched top-level fields are recorded as pending.
    pub async fn update(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
        patch: &Map<String, Value>,
    ) -> Entity {
        self.merge(collection, target.into(), patch, None).await
    }

    /// Like [`update`](Self::update), then re-run `schema.process` over the
    /// merged entity so derived fields follow the write. Top-level fields
    /// changed by the schema are recorded as pending too.
    pub async fn update_normalized(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
        patch: &Map<String, Value>,
        schema: &dyn EntitySchema,
    ) -> Entity {
        self.merge(collection, target.into(), patch, Some(schema)).await
    }

    async fn merge(
        &self,
        collection: &str,
        target: EntityRef,
        patch: &Map<String, Value>,
        schema: Option<&dyn EntitySchema>,
    ) -> Entity {
        let _gate = self.gate.lock().await;

        let mut current = match self.cache_get(collection, target.id()).await {
            Some(cached) => cached,
            None => match target {
                EntityRef::Entity(entity) => entity,
                EntityRef::Id(id) => {
                    let mut entity = Entity::new(id);
                    if let Some(pending) = self.pending_write(collection, &entity.id) {
                        entity.apply_patch(&pending.patch);
                    }
                    entity
                }
            },
        };

        current.apply_patch(patch);
        let mut touched: Vec<String> = patch.keys().filter(|k| *k != ID_FIELD).cloned().collect();
        if let Some(derived) = schema.and_then(|s| s.process(&current)) {
            for (key, value) in &derived.fields {
                if current.get(key) != Some(value) && !touched.contains(key) {
                    touched.push(key.clone());
                }
            }
            current = derived;
        }
        let generation = self.record(collection, &current.id, current.project(&touched));
        self.cache_set(collection, &current).await;

        debug!(
            collection,
            id = %current.id,
            generation,
            fields = touched.len(),
            "write queued"
        );
        current
    }

    /// Queue every field of `entity` for persistence and cache it.
    ///
    /// Used for freshly templated entities that have no durable row yet. If
    /// another caller cached the entity first, that value is returned and
    /// nothing is queued.
    pub async fn enqueue(&self, collection: &str, entity: Entity) -> Entity {
        let _gate = self.gate.lock().await;
        if let Some(cached) = self.cache_get(collection, &entity.id).await {
            return cached;
        }
        let generation = self.record(collection, &entity.id, entity.fields.clone());
        self.cache_set(collection, &entity).await;
        debug!(collection, id = %entity.id, generation, "entity queued");
        entity
    }

    /// Publish an entity loaded from the durable store.
    ///
    /// If a concurrent write already cached a value, that value wins.
    /// Otherwise pending fields are laid over `loaded` before caching, so the
    /// cache never loses unflushed writes.
    pub async fn load_through(&self, collection: &str, mut loaded: Entity) -> Entity {
        let _gate = self.gate.lock().await;
        if let Some(cached) = self.cache_get(collection, &loaded.id).await {
            return cached;
        }
        if let Some(pending) = self.pending_write(collection, &loaded.id) {
            loaded.apply_patch(&pending.patch);
        }
        self.cache_set(collection, &loaded).await;
        loaded
    }

    /// Delete the entity's row, then evict it from cache and pending state.
    ///
    /// Waits for any flush in progress so the row cannot be re-created by it.
    /// If the delete fails nothing is evicted, so unflushed writes survive.
    pub async fn remove(&self, collection: &str, id: &str) -> StoreResult<()> {
        let _flush = self.flush_lock.lock().await;
        let _gate = self.gate.lock().await;

        self.store.delete(collection, id).await?;

        let dropped = {
            let mut pending = self.lock_pending();
            let dropped = pending
                .get_mut(collection)
                .and_then(|writes| writes.remove(id))
                .is_some();
            if pending.get(collection).is_some_and(HashMap::is_empty) {
                pending.remove(collection);
            }
            dropped
        };

        if let Err(err) = self.cache.delete(collection, id).await {
            warn!(collection, id, %err, "cache unavailable during remove");
        }

        info!(collection, id, dropped_pending = dropped, "entity removed");
        Ok(())
    }

    /// Upsert every pending row into the durable store.
    ///
    /// Successful rows leave the pending map unless a newer write arrived
    /// while the upsert was in flight. Failed rows stay for the next pass.
    pub async fn flush(&self) -> FlushReport {
        let _flush = self.flush_lock.lock().await;

        let mut batch: Vec<(String, String, PendingWrite)> = {
            let pending = self.lock_pending();
            pending
                .iter()
                .flat_map(|(collection, writes)| {
                    writes
                        .iter()
                        .map(move |(id, write)| (collection.clone(), id.clone(), write.clone()))
                })
                .collect()
        };

        let mut report = FlushReport::default();
        if batch.is_empty() {
            return report;
        }
        batch.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        for (collection, id, write) in batch {
            report.attempted += 1;
            let row = Entity {
                id: id.clone(),
                fields: write.patch,
            };
            match self.store.upsert(&collection, &row, write.generation).await {
                Ok(()) => {
                    report.flushed += 1;
                    self.stats.flushed.fetch_add(1, Ordering::Relaxed);
                    self.settle(&collection, &id, write.generation);
                }
                Err(err) => {
                    report.failed += 1;
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        collection = %collection,
                        id = %id,
                        generation = write.generation,
                        %err,
                        "upsert failed, keeping write for retry"
                    );
                }
            }
        }

        if report.failed > 0 {
            warn!(?report, "flush finished with failures");
        } else {
            debug!(?report, "flush finished");
        }
        report
    }

    /// Pending fields for one entity.
    pub fn pending_write(&self, collection: &str, id: &str) -> Option<PendingWrite> {
        self.lock_pending()
            .get(collection)
            .and_then(|writes| writes.get(id))
            .cloned()
    }

    /// Whether the entity has unflushed writes.
    pub fn is_dirty(&self, collection: &str, id: &str) -> bool {
        self.pending_write(collection, id).is_some()
    }

    /// Total number of pending rows across collections.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().values().map(HashMap::len).sum()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    // ── internals ────────────────────────────────────────────────────

    fn lock_pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, collection: &str, id: &str, fields: Map<String, Value>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.lock_pending();
        let write = pending
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| PendingWrite {
                patch: Map::new(),
                generation,
            });
        for (key, value) in fields {
            write.patch.insert(key, value);
        }
        write.generation = generation;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        generation
    }

    fn settle(&self, collection: &str, id: &str, flushed_generation: u64) {
        let mut pending = self.lock_pending();
        let Some(writes) = pending.get_mut(collection) else {
            return;
        };
        if writes
            .get(id)
            .is_some_and(|w| w.generation == flushed_generation)
        {
            writes.remove(id);
        }
        if writes.is_empty() {
            pending.remove(collection);
        }
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

    async fn cache_set(&self, collection: &str, entity: &Entity) {
        if let Err(err) = self.cache.set(collection, &entity.id, entity, self.ttl).await {
            warn!(collection, id = %entity.id, %err, "cache unavailable, write kept pending only");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Flush loop
// ═══════════════════════════════════════════════════════════════════════

/// Background task flushing a [`WriteQueue`] on a fixed interval.
pub struct FlushLoop {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FlushLoop {
    /// Spawn the loop onto the current tokio runtime.
    pub fn start(queue: Arc<WriteQueue>, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let stop = Arc::clone(&shutdown);
        let wake = Arc::clone(&notify);
        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "flush loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                }
                if stop.load(Ordering::Acquire) {
                    break;
                }
                queue.flush().await;
            }
            info!("flush loop stopped");
        });

        Self {
            shutdown,
            notify,
            handle,
        }
    }

    /// Stop the loop after its current pass and wait for it to exit.
    pub async fn stop(self) -> StoreResult<()> {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
        self.handle.await.map_err(StoreError::from)
    }
}

// ── tests ────────────────────────────────────────────────────────────
