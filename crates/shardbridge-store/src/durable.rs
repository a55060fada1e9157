//! Durable store adapter.
//!
//! [`DurableStore`] is the thin interface over the relational backend:
//! select by id, upsert on the id conflict key, delete. Upserts are
//! column-level: the top-level fields in the supplied row replace the stored
//! ones and every other stored field is left as it is. The adapter never
//! merges inside a field; callers supply fully merged field values.
//!
//! Each row also records the write *generation* that last touched it so a
//! reader going straight to the store can tell whether the authority still
//! holds newer, unflushed state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};

/// Backend reachable by `(collection, id)`.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch a row, or `None` if it was never written.
    async fn select_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Entity>>;

    /// Insert the row or replace the supplied fields of the existing one.
    async fn upsert(&self, collection: &str, row: &Entity, generation: u64) -> StoreResult<()>;

    /// Remove a row. Deleting a missing row is not an error.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Generation recorded by the last upsert of this row.
    async fn generation(&self, collection: &str, id: &str) -> StoreResult<Option<u64>>;

    /// Make everything written so far durable before the process exits.
    async fn checkpoint(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn apply_columns(stored: &mut Map<String, Value>, row: &Entity) {
    for (key, value) in &row.fields {
        stored.insert(key.clone(), value.clone());
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SQLite
// ═══════════════════════════════════════════════════════════════════════

/// [`DurableStore`] over the shared `entities` table.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Create a store backed by an already migrated `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    #[instrument(skip(self))]
    async fn select_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Entity>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.db
            .read(move |conn| {
                let data: Option<String> = conn
                    .query_row(
                        "SELECT data FROM entities WHERE collection = ?1 AND id = ?2",
                        rusqlite::params![collection, id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match data {
                    Some(json) => {
                        let fields: Map<String, Value> = serde_json::from_str(&json)?;
                        Ok(Some(Entity { id, fields }))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    #[instrument(skip(self, row), fields(id = %row.id))]
    async fn upsert(&self, collection: &str, row: &Entity, generation: u64) -> StoreResult<()> {
        let collection = collection.to_string();
        let row = row.clone();
        let now = Utc::now().timestamp_millis();
        let generation = i64::try_from(generation)
            .map_err(|_| StoreError::InvalidArgument("generation overflow".into()))?;

        self.db
            .transaction(move |tx| {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT data FROM entities WHERE collection = ?1 AND id = ?2",
                        rusqlite::params![collection, row.id],
                        |r| r.get(0),
                    )
                    .optional()?;

                let mut stored: Map<String, Value> = match existing {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Map::new(),
                };
                apply_columns(&mut stored, &row);
                let data = serde_json::to_string(&stored)?;

                tx.execute(
                    "INSERT INTO entities (collection, id, data, updated_at, generation) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(collection, id) DO UPDATE SET \
                        data = excluded.data, \
                        updated_at = excluded.updated_at, \
                        generation = excluded.generation",
                    rusqlite::params![collection, row.id, data, now, generation],
                )?;
                Ok(())
            })
            .await?;

        debug!("row upserted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.db
            .transaction(move |tx| {
                tx.execute(
                    "DELETE FROM entities WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection, id],
                )?;
                Ok(())
            })
            .await
    }

    async fn generation(&self, collection: &str, id: &str) -> StoreResult<Option<u64>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.db
            .read(move |conn| {
                let generation: Option<i64> = conn
                    .query_row(
                        "SELECT generation FROM entities WHERE collection = ?1 AND id = ?2",
                        rusqlite::params![collection, id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(generation.map(|g| g.max(0) as u64))
            })
            .await
    }

    async fn checkpoint(&self) -> StoreResult<()> {
        self.db.checkpoint().await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  In-memory
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct MemoryRow {
    fields: Map<String, Value>,
    generation: u64,
}

/// Process-local [`DurableStore`] for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(String, String), MemoryRow>>,
    upserts: AtomicU64,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upsert calls served since creation.
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::Relaxed)
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Whether no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> StoreResult<std::sync::MutexGuard<'_, HashMap<(String, String), MemoryRow>>> {
        self.rows
            .lock()
            .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn select_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Entity>> {
        let rows = self.lock()?;
        Ok(rows
            .get(&(collection.to_string(), id.to_string()))
            .map(|row| Entity {
                id: id.to_string(),
                fields: row.fields.clone(),
            }))
    }

    async fn upsert(&self, collection: &str, row: &Entity, generation: u64) -> StoreResult<()> {
        self.upserts.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.lock()?;
        let stored = rows
            .entry((collection.to_string(), row.id.clone()))
            .or_insert_with(|| MemoryRow {
                fields: Map::new(),
                generation: 0,
            });
        apply_columns(&mut stored.fields, row);
        stored.generation = generation;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.lock()?.remove(&(collection.to_string(), id.to_string()));
        Ok(())
    }

    async fn generation(&self, collection: &str, id: &str) -> StoreResult<Option<u64>> {
        Ok(self
            .lock()?
            .get(&(collection.to_string(), id.to_string()))
            .map(|row| row.generation))
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn sqlite() -> SqliteStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        SqliteStore::new(db)
    }

    async fn exercise_column_upsert(store: &dyn DurableStore) {
        assert!(store.select_by_id("users", "1").await.unwrap().is_none());

        let first = Entity::new("1")
            .with_field("a", json!(1))
            .with_field("nested", json!({"x": 1, "y": 2}));
        store.upsert("users", &first, 1).await.unwrap();

        // Only `nested` is supplied; `a` must survive, `nested` is replaced whole.
        let second = Entity::new("1").with_field("nested", json!({"x": 5}));
        store.upsert("users", &second, 2).await.unwrap();

        let row = store.select_by_id("users", "1").await.unwrap().unwrap();
        assert_eq!(row.get("a"), Some(&json!(1)));
        assert_eq!(row.get("nested"), Some(&json!({"x": 5})));
        assert_eq!(store.generation("users", "1").await.unwrap(), Some(2));

        store.delete("users", "1").await.unwrap();
        assert!(store.select_by_id("users", "1").await.unwrap().is_none());
        // idempotent
        store.delete("users", "1").await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_column_upsert() {
        let store = sqlite().await;
        exercise_column_upsert(&store).await;
    }

    #[tokio::test]
    async fn memory_column_upsert() {
        let store = MemoryStore::new();
        exercise_column_upsert(&store).await;
        assert_eq!(store.upsert_count(), 2);
    }

    #[tokio::test]
    async fn sqlite_scopes_rows_by_collection() {
        let store = sqlite().await;
        store
            .upsert("users", &Entity::new("1").with_field("kind", json!("user")), 1)
            .await
            .unwrap();
        store
            .upsert("tenants", &Entity::new("1").with_field("kind", json!("tenant")), 1)
            .await
            .unwrap();

        let user = store.select_by_id("users", "1").await.unwrap().unwrap();
        let tenant = store.select_by_id("tenants", "1").await.unwrap().unwrap();
        assert_eq!(user.get("kind"), Some(&json!("user")));
        assert_eq!(tenant.get("kind"), Some(&json!("tenant")));
    }
}
