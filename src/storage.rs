//! Storage Layer
//!
//! Sharded relational storage behind a small capability interface:
//! - **Adapters**: one per physical database ([`SqliteStore`], [`MemoryStore`])
//! - **Router**: [`DistStore`] fans operations out per [`Distribution`] policy
//!
//! # Components
//!
//! - [`StoreAdapter`]: existence checks, table creation, equality selects, bulk inserts
//! - [`DistStore`]: ordered shard list, index 0 is the primary
//! - [`connect`] / [`connect_all`]: build adapters from connection strings

mod adapter;
mod error;
mod memory;
mod router;
mod sqlite;

use std::sync::Arc;

pub use adapter::{ColumnSpec, ColumnType, ColumnValue, Filter, Row, StoreAdapter};
pub use error::StorageError;
pub use memory::{MemoryStore, StoreCalls};
pub use router::{DistStore, Distribution};
pub use sqlite::SqliteStore;

/// DSN prefix for in-process stores.
const MEMORY_SCHEME: &str = "memory://";

/// Open a single store from its connection string.
///
/// Supported schemes:
/// - `sqlite:` - SQLite file or in-memory database
/// - `memory://<name>` - in-process [`MemoryStore`]
pub async fn connect(dsn: &str) -> Result<Arc<dyn StoreAdapter>, StorageError> {
    if let Some(name) = dsn.strip_prefix(MEMORY_SCHEME) {
        return Ok(Arc::new(MemoryStore::new(name)));
    }
    if dsn.starts_with("sqlite:") {
        return Ok(Arc::new(SqliteStore::connect(dsn).await?));
    }
    Err(StorageError::UnsupportedDsn(
        dsn.split("://").next().unwrap_or(dsn).to_string(),
    ))
}

/// Open every store and build the router, preserving order.
pub async fn connect_all<S: AsRef<str>>(dsns: &[S]) -> Result<DistStore, StorageError> {
    let mut stores = Vec::with_capacity(dsns.len());
    for (idx, dsn) in dsns.iter().enumerate() {
        let store = connect(dsn.as_ref()).await.map_err(|e| e.on_shard(idx))?;
        tracing::info!(shard = idx, store = %store.describe(), "Store connected");
        stores.push(store);
    }
    DistStore::new(stores)
}
