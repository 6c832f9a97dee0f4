//! Collector Layer
//!
//! Accepts validated events into an in-memory buffer and flushes them on a
//! fixed cadence as one bulk insert per daily table.
//!
//! # Architecture
//!
//! - [`Collector`]: `enqueue` (validation + append), `flush_once`, background loop
//! - [`TableCache`]: LRU + TTL cache of table existence
//! - [`CollectorStats`]: counters exposed over HTTP
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sluice::{Collector, CollectorConfig, Event, SchemaDefinition, SchemaMapper, TableTimezone};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(sluice::storage::connect_all(&["sqlite::memory:"]).await?);
//! let schema = SchemaDefinition::load_from_file("configs/events.yaml")?;
//! let mapper = Arc::new(SchemaMapper::new(Arc::clone(&store), schema, TableTimezone::Local));
//! mapper.reconcile_mappings().await?;
//!
//! let collector = Arc::new(Collector::new(mapper, store, CollectorConfig::default()));
//! collector.start()?;
//! let result = collector.enqueue([Event::new("user_created").with_property("user_id", 1)]);
//! assert_eq!(result.accepted, 1);
//! collector.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod batcher;
mod error;
mod table_cache;

pub use batcher::{
    Collector, CollectorState, CollectorStats, EnqueueResult, FlushFailure, FlushReport,
};
pub use error::CollectorError;
pub use table_cache::TableCache;
