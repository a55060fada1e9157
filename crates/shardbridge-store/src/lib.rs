//! # shardbridge-store
//!
//! Authority-side data layer for shardbridge.
//!
//! One process, the *authority*, owns the cache and the durable store and
//! serves every entity read and write. Writes land in the cache at once and
//! reach the durable store through a batched write-behind queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  AuthorityDataManager                   │
//! │    fetch / fetch_or_create / update /   │
//! │    remove / flush / shutdown            │
//! ├──────────────┬──────────────────────────┤
//! │ SchemaRegistry│ WriteQueue (+FlushLoop) │
//! ├──────────────┴──────────────────────────┤
//! │  CacheStore (moka, TTL per entry)       │
//! ├─────────────────────────────────────────┤
//! │  DurableStore (SQLite WAL / memory)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use shardbridge_store::{AuthorityConfig, AuthorityDataManager, SchemaRegistry};
//!
//! let authority = AuthorityDataManager::open(
//!     "data/shardbridge.db",
//!     SchemaRegistry::with_builtins(),
//!     AuthorityConfig::default(),
//! ).await?;
//! authority.start().await;
//! let user = authority.fetch_or_create("users", "42").await?;
//! ```

pub mod authority;
pub mod cache;
pub mod config;
pub mod db;
pub mod durable;
pub mod entity;
pub mod error;
pub mod migration;
pub mod queue;
pub mod schema;

// ── re-exports ───────────────────────────────────────────────────────

pub use authority::{AuthorityDataManager, AuthorityStats};
pub use cache::{CacheStats, CacheStatsSnapshot, CacheStore, DEFAULT_TTL, MokaCacheStore};
pub use config::AuthorityConfig;
pub use db::Database;
pub use durable::{DurableStore, MemoryStore, SqliteStore};
pub use entity::{Entity, EntityRef, deep_merge};
pub use error::{StoreError, StoreResult};
pub use queue::{FlushLoop, FlushReport, PendingWrite, QueueStatsSnapshot, WriteQueue};
pub use schema::{
    DefaultsSchema, EntitySchema, METRICS, MetricsSchema, SchemaRegistry, TENANTS, TenantSchema,
    USERS, UserSchema,
};
