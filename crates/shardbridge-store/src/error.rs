//! Error types for the shardbridge-store crate.
//!
//! All data-layer operations return [`StoreError`] via [`StoreResult`].
//! Uses `thiserror` for ergonomic, zero-cost error definitions.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the data layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The collection was never registered with the schema registry.
    #[error("no schema registered for collection `{collection}`")]
    SchemaNotFound { collection: String },

    /// A durable-store call failed while serving an explicit request.
    #[error("durable store call failed for `{collection}`: {source}")]
    Store {
        collection: String,
        #[source]
        source: Box<StoreError>,
    },

    /// The durable backend rejected or could not serve a request.
    #[error("backend error: {0}")]
    Backend(String),

    /// The cache store could not be reached. Callers degrade this to a miss.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// Wrap an adapter failure with the collection it happened on.
    pub fn store(collection: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            collection: collection.into(),
            source: Box::new(source),
        }
    }

    /// Stable, machine-readable kind used when the error crosses a process
    /// boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaNotFound { .. } => "schema_not_found",
            Self::Store { .. } | Self::Sqlite(_) | Self::Backend(_) | Self::Migration { .. } => {
                "store"
            }
            Self::CacheUnavailable(_) => "cache_unavailable",
            Self::InvalidArgument(_) | Self::Json(_) => "invalid_argument",
            Self::TaskJoin(_) => "internal",
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
