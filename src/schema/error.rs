//! Schema mapping error types.

use thiserror::Error;

use crate::storage::{ColumnType, StorageError};

/// Errors raised by schema loading, validation and column mapping.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Event failed validation against the loaded schema.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Event name has no schema entry.
    #[error("event not defined: {0}")]
    EventNotDefined(String),

    /// Persisted column type disagrees with the declared property type.
    #[error("type conflict in {event}.{property}: DB column type is {column_type}")]
    PropertyTypeConflict {
        event: String,
        property: String,
        column_type: String,
    },

    /// No free slot column left for a property of this type.
    #[error("column capacity exceeded for {event}.{property}: all {capacity} {column_type} columns in use")]
    ColumnCapacityExceeded {
        event: String,
        property: String,
        column_type: ColumnType,
        capacity: u32,
    },

    /// Property has no persisted column (mappings not reconciled).
    #[error("no column mapped for {event}.{property}")]
    MappingMissing { event: String, property: String },

    /// Event time cannot be represented as a calendar date.
    #[error("invalid event time: {0}")]
    InvalidEventTime(i64),

    /// Stored row cannot be turned back into an event.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Schema definition is malformed.
    #[error("schema definition error: {0}")]
    Definition(String),

    /// Failed to read the schema file.
    #[error("failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the schema file.
    #[error("failed to parse schema file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
