//! Sluice - schema-mapped event ingestion
//!
//! Clients submit named events with typed properties. Sluice validates them
//! against a declared schema, maps every property onto a generic slot column
//! of a wide daily table, buffers accepted events and writes them in bulk to
//! a set of database shards.
//!
//! # Architecture
//!
//! - **Storage**: [`StoreAdapter`] per database, [`DistStore`] routing by [`Distribution`]
//! - **Schema**: [`SchemaMapper`] for validation, column mapping and daily tables
//! - **Collector**: [`Collector`] buffering and periodic per-table flushes
//! - **Server**: axum ingestion endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sluice::{Collector, CollectorConfig, Event, SchemaDefinition, SchemaMapper, TableTimezone};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(sluice::storage::connect_all(&["sqlite:data/shard0.db?mode=rwc"]).await?);
//! let schema = SchemaDefinition::from_yaml("events:\n  signup: { user_id: int }\n")?;
//! let mapper = Arc::new(SchemaMapper::new(Arc::clone(&store), schema, TableTimezone::Utc));
//! mapper.reconcile_mappings().await?;
//!
//! let collector = Collector::new(mapper, store, CollectorConfig::default());
//! collector.enqueue([Event::new("signup").with_property("user_id", 42)]);
//! let report = collector.flush_once().await;
//! assert_eq!(report.records_written, 1);
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod schema;
pub mod server;
pub mod storage;

pub use collector::{Collector, CollectorError, CollectorState, CollectorStats, EnqueueResult, FlushReport, TableCache};
pub use config::{AppConfig, CollectorConfig, ConfigError};
pub use schema::{
    ColumnMapping, Event, EventDefinition, PropertyType, SchemaDefinition, SchemaError,
    SchemaMapper, TableTimezone,
};
pub use storage::{
    ColumnSpec, ColumnType, ColumnValue, DistStore, Distribution, MemoryStore, Row, SqliteStore,
    StorageError, StoreAdapter,
};
