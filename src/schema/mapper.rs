//! Schema mapper: logical events to physical rows and tables.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::RwLock;

use crate::schema::mapping::{
    ColumnMapping, MAPPING_TABLE, MappingEntry, RESERVED_COLUMNS, SlotColumn,
    mapping_table_columns, mappings_from_rows,
};
use crate::schema::{ENUM_HASH_VERSION, Event, PropertyType, SchemaDefinition, SchemaError};
use crate::storage::{ColumnSpec, ColumnType, ColumnValue, DistStore, Distribution, Filter, Row};

/// Prefix of per-day event tables.
pub const TABLE_PREFIX: &str = "events_";

/// Timezone used to bucket events into daily tables.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TableTimezone {
    /// Process local time.
    #[default]
    Local,
    Utc,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Mappings already persisted and confirmed.
    pub existing: usize,
    /// Mappings allocated and written by this pass.
    pub allocated: usize,
}

/// Current unix time in seconds.
pub(crate) fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// Translates events to and from physical rows.
///
/// Mappings are read from the primary shard and memoized per event name;
/// the memo is cleared whenever reconciliation writes new mappings.
pub struct SchemaMapper {
    store: Arc<DistStore>,
    schema: SchemaDefinition,
    timezone: TableTimezone,
    mappings: RwLock<HashMap<String, Arc<ColumnMapping>>>,
}

impl std::fmt::Debug for SchemaMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaMapper")
            .field("events", &self.schema.events.len())
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl SchemaMapper {
    pub fn new(store: Arc<DistStore>, schema: SchemaDefinition, timezone: TableTimezone) -> Self {
        Self {
            store,
            schema,
            timezone,
            mappings: RwLock::new(HashMap::new()),
        }
    }

    /// Install a new logical schema. Must not be called while traffic flows.
    pub fn load(&mut self, schema: SchemaDefinition) -> Result<(), SchemaError> {
        schema.validate()?;
        self.schema = schema;
        self.mappings.get_mut().clear();
        Ok(())
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub fn timezone(&self) -> TableTimezone {
        self.timezone
    }

    // =========================================================================
    // Mapping reconciliation
    // =========================================================================

    /// Check persisted mappings against the schema and allocate missing ones.
    ///
    /// Every event is checked before anything is written, so a conflict in
    /// one event leaves the mapping table untouched.
    ///
    /// # Errors
    /// - `PropertyTypeConflict` if a persisted column type differs from the
    ///   declared property type
    /// - `ColumnCapacityExceeded` if no slot of the needed type is left
    pub async fn reconcile_mappings(&self) -> Result<ReconcileReport, SchemaError> {
        if !self.store.table_exists(MAPPING_TABLE, Distribution::All).await? {
            self.store
                .create_table(MAPPING_TABLE, &mapping_table_columns(), Distribution::All)
                .await?;
            tracing::info!(table = MAPPING_TABLE, "Created mapping table");
        }

        let rows = self
            .store
            .select(MAPPING_TABLE, &Filter::new(), Distribution::Primary)
            .await?;
        let mut persisted = mappings_from_rows(&rows)?;

        let mut report = ReconcileReport::default();
        let mut new_rows = Vec::new();

        for event in self.schema.events.values() {
            let mapping = persisted.entry(event.name.clone()).or_default();
            for (property, ty) in self.schema.slotted_properties(event) {
                let wanted = ty.column_type();
                let capacity = self.schema.meta.capacity(wanted);

                if let Some(slot) = mapping.column_for(property) {
                    if slot.column_type != wanted {
                        return Err(SchemaError::PropertyTypeConflict {
                            event: event.name.clone(),
                            property: property.clone(),
                            column_type: slot.column_type.to_string(),
                        });
                    }
                    if slot.index >= capacity {
                        return Err(SchemaError::ColumnCapacityExceeded {
                            event: event.name.clone(),
                            property: property.clone(),
                            column_type: wanted,
                            capacity,
                        });
                    }
                    report.existing += 1;
                    continue;
                }

                let slot = (0..capacity)
                    .map(|idx| SlotColumn::new(wanted, idx))
                    .find(|slot| !mapping.is_used(*slot))
                    .ok_or_else(|| SchemaError::ColumnCapacityExceeded {
                        event: event.name.clone(),
                        property: property.clone(),
                        column_type: wanted,
                        capacity,
                    })?;

                mapping.assign(&event.name, property, slot)?;
                new_rows.push(MappingEntry::new_row(&event.name, property, slot));
                tracing::info!(
                    event = %event.name,
                    property = %property,
                    column = %slot,
                    "Allocated column mapping"
                );
            }
        }

        if !new_rows.is_empty() {
            self.store
                .bulk_insert(MAPPING_TABLE, &new_rows, Distribution::Primary)
                .await?;
            report.allocated = new_rows.len();
        }
        self.mappings.write().await.clear();

        tracing::info!(
            existing = report.existing,
            allocated = report.allocated,
            enum_hash = ENUM_HASH_VERSION,
            "Column mappings reconciled"
        );
        Ok(report)
    }

    /// Mapping of one event, memoized after the first read.
    pub async fn mapping_for(&self, event_name: &str) -> Result<Arc<ColumnMapping>, SchemaError> {
        if let Some(mapping) = self.mappings.read().await.get(event_name) {
            return Ok(Arc::clone(mapping));
        }

        let filter = Filter::from([("event_name".to_string(), ColumnValue::from(event_name))]);
        let rows = self
            .store
            .select(MAPPING_TABLE, &filter, Distribution::Primary)
            .await?;
        let mapping = Arc::new(
            mappings_from_rows(&rows)?
                .remove(event_name)
                .unwrap_or_default(),
        );

        self.mappings
            .write()
            .await
            .insert(event_name.to_string(), Arc::clone(&mapping));
        Ok(mapping)
    }

    // =========================================================================
    // Validation and conversion
    // =========================================================================

    /// Check an event against the schema, naming the first problem found.
    pub fn check(&self, event: &Event) -> Result<(), SchemaError> {
        if !self.schema.events.contains_key(&event.event_name) {
            return Err(SchemaError::EventNotDefined(event.event_name.clone()));
        }
        for (name, value) in &event.properties {
            let ty = self
                .schema
                .property_type(&event.event_name, name)
                .ok_or_else(|| {
                    SchemaError::InvalidEvent(format!(
                        "{}: unknown property '{name}'",
                        event.event_name
                    ))
                })?;
            if !ty.accepts(value) {
                return Err(SchemaError::InvalidEvent(format!(
                    "{}: value {value} does not match type of '{name}'",
                    event.event_name
                )));
            }
        }
        if let Some(event_time) = event.event_time {
            self.table_for_time(event_time)?;
        }
        Ok(())
    }

    /// Whether an event is valid. Pure: never touches storage.
    pub fn validate(&self, event: &Event) -> bool {
        self.check(event).is_ok()
    }

    /// Convert a valid event into a row keyed by physical column names.
    pub async fn to_physical_record(&self, event: &Event) -> Result<Row, SchemaError> {
        self.check(event).map_err(|e| match e {
            SchemaError::EventNotDefined(name) => {
                SchemaError::InvalidEvent(format!("event not defined: {name}"))
            }
            other => other,
        })?;
        let mapping = self.mapping_for(&event.event_name).await?;

        let mut row = Row::new();
        row.insert("event_name".to_string(), ColumnValue::from(event.event_name.as_str()));
        row.insert(
            "event_time".to_string(),
            ColumnValue::Int(event.event_time.unwrap_or_else(now_epoch)),
        );

        for (name, value) in &event.properties {
            let (column, ty) = if let Some(ty) = self.schema.common_properties.get(name) {
                (name.clone(), ty)
            } else {
                let slot = mapping.column_for(name).ok_or_else(|| SchemaError::MappingMissing {
                    event: event.event_name.clone(),
                    property: name.clone(),
                })?;
                let ty = self
                    .schema
                    .property_type(&event.event_name, name)
                    .ok_or_else(|| SchemaError::InvalidEvent(name.clone()))?;
                (slot.to_string(), ty)
            };
            let stored = ty
                .to_column_value(value)
                .ok_or_else(|| SchemaError::InvalidEvent(name.clone()))?;
            row.insert(column, stored);
        }
        Ok(row)
    }

    /// Rebuild an event from a stored row. NULL columns are omitted.
    pub async fn from_physical_record(&self, record: &Row) -> Result<Event, SchemaError> {
        let event_name = record
            .get("event_name")
            .and_then(ColumnValue::as_text)
            .ok_or_else(|| SchemaError::InvalidRecord("row without event_name".to_string()))?;
        if !self.schema.events.contains_key(event_name) {
            return Err(SchemaError::EventNotDefined(event_name.to_string()));
        }
        let event_time = record.get("event_time").and_then(ColumnValue::as_int);
        let mapping = self.mapping_for(event_name).await?;

        let mut properties = Map::new();
        for (column, value) in record {
            if value.is_null() || RESERVED_COLUMNS.contains(&column.as_str()) {
                continue;
            }

            let (name, ty): (&str, &PropertyType) =
                if let Some(ty) = self.schema.common_properties.get(column) {
                    (column.as_str(), ty)
                } else {
                    let slot: SlotColumn = column.parse().map_err(SchemaError::InvalidRecord)?;
                    let name = mapping.property_for(slot).ok_or_else(|| {
                        SchemaError::InvalidRecord(format!(
                            "{event_name}: value in unmapped column {slot}"
                        ))
                    })?;
                    let ty = self
                        .schema
                        .property_type(event_name, name)
                        .ok_or_else(|| SchemaError::MappingMissing {
                            event: event_name.to_string(),
                            property: name.to_string(),
                        })?;
                    (name, ty)
                };

            if let Some(decoded) = ty.from_column_value(value) {
                properties.insert(name.to_string(), decoded);
            }
        }

        Ok(Event {
            event_name: event_name.to_string(),
            event_time,
            properties,
        })
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Daily table an event belongs to.
    pub fn select_destination_table(&self, event: &Event) -> Result<String, SchemaError> {
        self.table_for_time(event.event_time.unwrap_or_else(now_epoch))
    }

    /// Daily table for an epoch-seconds timestamp, e.g. `events_20240131`.
    pub fn table_for_time(&self, event_time: i64) -> Result<String, SchemaError> {
        let day = match self.timezone {
            TableTimezone::Local => format_day(Local.timestamp_opt(event_time, 0).single()),
            TableTimezone::Utc => format_day(Utc.timestamp_opt(event_time, 0).single()),
        };
        day.map(|d| format!("{TABLE_PREFIX}{d}"))
            .ok_or(SchemaError::InvalidEventTime(event_time))
    }

    /// Column layout shared by every event table.
    pub fn table_columns(&self) -> Vec<ColumnSpec> {
        let meta = &self.schema.meta;
        let string_len = meta.string_max_len;

        let mut columns = vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("event_name", ColumnType::String).with_max_len(string_len),
            ColumnSpec::new("event_time", ColumnType::Int),
        ];

        for (name, ty) in &self.schema.common_properties {
            let spec = ColumnSpec::new(name.as_str(), ty.column_type());
            columns.push(match ty.column_type() {
                ColumnType::String => spec.with_max_len(string_len),
                _ => spec,
            });
        }

        for column_type in [ColumnType::Int, ColumnType::Float, ColumnType::String] {
            for idx in 0..meta.capacity(column_type) {
                let spec = ColumnSpec::new(SlotColumn::new(column_type, idx).to_string(), column_type);
                columns.push(match column_type {
                    ColumnType::String => spec.with_max_len(string_len),
                    _ => spec,
                });
            }
        }
        columns
    }

    /// Create an event table on every shard unless it already exists.
    ///
    /// Returns `true` if the table had to be created.
    pub async fn ensure_table(&self, table: &str) -> Result<bool, SchemaError> {
        if self.store.table_exists(table, Distribution::All).await? {
            return Ok(false);
        }
        self.store
            .create_table(table, &self.table_columns(), Distribution::All)
            .await?;
        tracing::info!(table = %table, "Created event table");
        Ok(true)
    }
}

fn format_day<Tz: TimeZone>(time: Option<DateTime<Tz>>) -> Option<String>
where
    Tz::Offset: std::fmt::Display,
{
    time.map(|t| t.format("%Y%m%d").to_string())
}
