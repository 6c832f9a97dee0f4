//! Collector error types.

use thiserror::Error;

use crate::schema::SchemaError;
use crate::storage::StorageError;

/// Errors raised by the batching collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Event conversion or table creation failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Bulk insert failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The flush loop is already running or was stopped.
    #[error("collector already started")]
    AlreadyStarted,

    /// The flush task panicked or was aborted.
    #[error("flush task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
