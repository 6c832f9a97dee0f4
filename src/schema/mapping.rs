//! Property to slot-column mappings.
//!
//! Every event table carries a fixed pool of generically named columns
//! (`int_0`, `float_2`, `string_5`, ...). Each event type assigns its own
//! properties to slots of the matching type; the assignment is persisted in
//! the mapping table and never changes once made.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::schema::SchemaError;
use crate::storage::{ColumnSpec, ColumnType, ColumnValue, Row};

/// Name of the persisted mapping table.
pub const MAPPING_TABLE: &str = "event_mapping";

/// Columns present in every event table besides slots and common properties.
pub const RESERVED_COLUMNS: [&str; 3] = ["id", "event_name", "event_time"];

/// Maximum length of name columns in the mapping table.
const MAPPING_NAME_LEN: u32 = 255;

/// Physical layout of the mapping table.
pub fn mapping_table_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::primary_key("id"),
        ColumnSpec::new("event_name", ColumnType::String).with_max_len(MAPPING_NAME_LEN),
        ColumnSpec::new("property", ColumnType::String).with_max_len(MAPPING_NAME_LEN),
        ColumnSpec::new("column_name", ColumnType::String).with_max_len(MAPPING_NAME_LEN),
    ]
}

// =============================================================================
// Slot Columns
// =============================================================================

/// A typed slot column, written `<type>_<index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotColumn {
    pub column_type: ColumnType,
    pub index: u32,
}

impl SlotColumn {
    pub fn new(column_type: ColumnType, index: u32) -> Self {
        Self { column_type, index }
    }
}

impl fmt::Display for SlotColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.column_type, self.index)
    }
}

impl FromStr for SlotColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, idx) = s
            .rsplit_once('_')
            .ok_or_else(|| format!("'{s}' is not a slot column"))?;
        let column_type = ColumnType::from_str(ty).map_err(|_| format!("'{s}' is not a slot column"))?;
        let index: u32 = idx.parse().map_err(|_| format!("'{s}' is not a slot column"))?;

        let slot = Self::new(column_type, index);
        // Reject spellings such as `int_01` that would alias `int_1`.
        if slot.to_string() != s {
            return Err(format!("'{s}' is not a canonical slot column"));
        }
        Ok(slot)
    }
}

// =============================================================================
// Column Mapping
// =============================================================================

/// Bidirectional property/column mapping of one event type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    by_property: BTreeMap<String, SlotColumn>,
    by_column: BTreeMap<SlotColumn, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an assignment.
    ///
    /// # Errors
    /// Returns `SchemaError::InvalidRecord` if either the property or the
    /// column is already assigned to something else.
    pub fn assign(
        &mut self,
        event: &str,
        property: &str,
        slot: SlotColumn,
    ) -> Result<(), SchemaError> {
        if let Some(existing) = self.by_property.get(property) {
            if *existing == slot {
                return Ok(());
            }
            return Err(SchemaError::InvalidRecord(format!(
                "{event}.{property} mapped to both {existing} and {slot}"
            )));
        }
        if let Some(owner) = self.by_column.get(&slot) {
            return Err(SchemaError::InvalidRecord(format!(
                "{event}: column {slot} mapped to both {owner} and {property}"
            )));
        }
        self.by_property.insert(property.to_string(), slot);
        self.by_column.insert(slot, property.to_string());
        Ok(())
    }

    pub fn column_for(&self, property: &str) -> Option<SlotColumn> {
        self.by_property.get(property).copied()
    }

    pub fn property_for(&self, slot: SlotColumn) -> Option<&str> {
        self.by_column.get(&slot).map(String::as_str)
    }

    /// Whether a slot is taken by any property.
    pub fn is_used(&self, slot: SlotColumn) -> bool {
        self.by_column.contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.by_property.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_property.is_empty()
    }

    /// Iterate assignments in property order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SlotColumn)> {
        self.by_property.iter().map(|(p, c)| (p.as_str(), *c))
    }
}

/// One parsed row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MappingEntry {
    pub id: i64,
    pub event_name: String,
    pub property: String,
    pub column: SlotColumn,
}

impl MappingEntry {
    /// Parse a mapping table row.
    pub fn from_row(row: &Row) -> Result<Self, SchemaError> {
        let text = |name: &str| {
            row.get(name)
                .and_then(ColumnValue::as_text)
                .map(str::to_string)
                .ok_or_else(|| {
                    SchemaError::InvalidRecord(format!("{MAPPING_TABLE} row without {name}"))
                })
        };

        let id = row.get("id").and_then(ColumnValue::as_int).unwrap_or_default();
        let column = text("column_name")?
            .parse()
            .map_err(SchemaError::InvalidRecord)?;

        Ok(Self {
            id,
            event_name: text("event_name")?,
            property: text("property")?,
            column,
        })
    }

    /// Row to insert for a new assignment (the id is store-assigned).
    pub fn new_row(event_name: &str, property: &str, column: SlotColumn) -> Row {
        Row::from([
            ("event_name".to_string(), ColumnValue::from(event_name)),
            ("property".to_string(), ColumnValue::from(property)),
            ("column_name".to_string(), ColumnValue::Text(column.to_string())),
        ])
    }
}

/// Group mapping table rows per event, applying them in id order.
pub fn mappings_from_rows(rows: &[Row]) -> Result<BTreeMap<String, ColumnMapping>, SchemaError> {
    let mut entries = rows
        .iter()
        .map(MappingEntry::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.id);

    let mut mappings: BTreeMap<String, ColumnMapping> = BTreeMap::new();
    for entry in entries {
        mappings
            .entry(entry.event_name.clone())
            .or_default()
            .assign(&entry.event_name, &entry.property, entry.column)?;
    }
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_column_parse() {
        assert_eq!(
            "int_3".parse::<SlotColumn>().unwrap(),
            SlotColumn::new(ColumnType::Int, 3)
        );
        assert_eq!(
            "string_10".parse::<SlotColumn>().unwrap().to_string(),
            "string_10"
        );
        for bad in ["int", "int_", "int_x", "int_01", "blob_1", "event_time", "user_id"] {
            assert!(bad.parse::<SlotColumn>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_mapping_is_bijective() {
        let mut mapping = ColumnMapping::new();
        let int0 = SlotColumn::new(ColumnType::Int, 0);
        mapping.assign("e", "user_id", int0).unwrap();
        mapping.assign("e", "user_id", int0).unwrap();

        assert!(mapping.assign("e", "age", int0).is_err());
        assert!(
            mapping
                .assign("e", "user_id", SlotColumn::new(ColumnType::Int, 1))
                .is_err()
        );
        assert_eq!(mapping.property_for(int0), Some("user_id"));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_mappings_from_rows() {
        let mut a = MappingEntry::new_row("user_created", "user_id", SlotColumn::new(ColumnType::Int, 0));
        a.insert("id".to_string(), ColumnValue::Int(2));
        let mut b = MappingEntry::new_row("user_created", "platform", SlotColumn::new(ColumnType::String, 0));
        b.insert("id".to_string(), ColumnValue::Int(1));

        assert_eq!(MappingEntry::from_row(&a).unwrap().id, 2);
        let mappings = mappings_from_rows(&[a, b]).unwrap();
        let mapping = &mappings["user_created"];
        assert_eq!(mapping.len(), 2);
        assert_eq!(
            mapping.column_for("platform"),
            Some(SlotColumn::new(ColumnType::String, 0))
        );
    }

    #[test]
    fn test_malformed_mapping_row() {
        let mut row = MappingEntry::new_row("e", "p", SlotColumn::new(ColumnType::Int, 0));
        row.insert("column_name".to_string(), ColumnValue::from("blob_0"));
        assert!(matches!(
            MappingEntry::from_row(&row),
            Err(SchemaError::InvalidRecord(_))
        ));
    }
}
