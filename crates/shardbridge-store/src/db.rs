//! SQLite connection handle.
//!
//! One [`Database`] serves the whole authority. Every call runs on the
//! blocking pool and takes the single connection, so statements from
//! different tasks never interleave. Writes go through
//! [`Database::transaction`], which commits only when the closure succeeds.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// How long a statement waits on a locked database file before failing.
const BUSY_TIMEOUT_MS: i32 = 5_000;

/// Shared handle to the authority's SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    location: Arc<str>,
}

impl Database {
    /// Open (or create) the database file at `path`, creating its parent
    /// directory if needed. Blocks on file I/O.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn, true)?;
        info!(path = %path.display(), "database opened");
        Ok(Self::wrap(conn, path.display().to_string()))
    }

    /// A private in-memory database. WAL does not apply to it.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, false)?;
        debug!("in-memory database opened");
        Ok(Self::wrap(conn, ":memory:".to_string()))
    }

    /// Open the file and bring its schema up to date, off the async runtime.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.read(migration::run_all).await
    }

    /// Where the database lives, for logs.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run a read-only closure against the connection.
    pub async fn read<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&*lock(&conn)?)).await?
    }

    /// Run `f` inside a transaction. An `Err` from `f` rolls it back.
    pub async fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            let tx = guard.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }

    /// Fold the WAL back into the main file and truncate it.
    pub async fn checkpoint(&self) -> StoreResult<()> {
        self.read(|conn| {
            // Returns (busy, wal frames, frames checkpointed).
            let (busy, frames, done): (i64, i64, i64) =
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
            debug!(busy, frames, done, "wal checkpoint");
            Ok(())
        })
        .await?;
        info!(location = %self.location, "database checkpointed");
        Ok(())
    }

    fn wrap(conn: Connection, location: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            location: location.into(),
        }
    }

    fn configure(conn: &Connection, on_disk: bool) -> StoreResult<()> {
        if on_disk {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
        Ok(())
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::TaskJoin(format!("database mutex poisoned: {e}")))
}

// ── tests ────────────────────────────────────────────────────────────
