//! Storage-specific error types.
//!
//! All store and router operations return [`StorageError`] on failure, which
//! can be matched to determine the underlying cause (database, query build,
//! missing table, shard, etc.).

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to build a SQL statement.
    #[error("query build error: {0}")]
    Query(#[from] sea_query::error::Error),

    /// Operation referenced a table that does not exist on the store.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Connection string scheme is not supported.
    #[error("unsupported database DSN: {0}")]
    UnsupportedDsn(String),

    /// The router was configured without any backing store.
    #[error("no backing stores configured")]
    NoShards,

    /// A store is refusing operations.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Invalid data in a row or filter (e.g., unknown column).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Failure on one shard of a routed operation.
    #[error("shard {shard} failed: {source}")]
    Shard {
        shard: usize,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Wrap an error with the index of the shard that produced it.
    pub(crate) fn on_shard(self, shard: usize) -> Self {
        match self {
            Self::Shard { .. } => self,
            other => Self::Shard {
                shard,
                source: Box::new(other),
            },
        }
    }
}
