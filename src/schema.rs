//! Schema Layer
//!
//! Maps logical events onto fixed-width physical tables:
//! - **Definitions**: events, their typed properties and the slot pool sizes
//! - **Mappings**: per-event property to slot-column assignment, persisted and append-only
//! - **Mapper**: validation, row conversion, daily table naming and creation
//!
//! # Physical layout
//!
//! ```text
//! event_mapping(id, event_name, property, column_name)
//! events_YYYYMMDD(id, event_name, event_time, <common properties>,
//!                 int_0.., float_0.., string_0..)
//! ```

mod error;
mod hash;
mod mapper;
mod mapping;
mod types;

pub use error::SchemaError;
pub use hash::{ENUM_HASH_VERSION, enum_hash};
pub use mapper::{ReconcileReport, SchemaMapper, TABLE_PREFIX, TableTimezone};
pub use mapping::{ColumnMapping, MAPPING_TABLE, RESERVED_COLUMNS, SlotColumn};
pub use types::{ColumnMeta, Event, EventDefinition, PropertyType, SchemaDefinition};

pub(crate) use mapper::now_epoch;
