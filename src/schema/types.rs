//! Logical schema and event types.
//!
//! - [`PropertyType`]: declared type of a property (`int`, `float`, `string` or enum literals)
//! - [`EventDefinition`]: one named event and its properties
//! - [`SchemaDefinition`]: every event plus common properties and slot pool sizes
//! - [`Event`]: an inbound event record

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::schema::SchemaError;
use crate::schema::hash::enum_hash;
use crate::schema::mapping::{RESERVED_COLUMNS, SlotColumn};
use crate::storage::{ColumnType, ColumnValue};

// =============================================================================
// Property Types
// =============================================================================

/// Declared type of a property.
///
/// In schema files a scalar type is written as its name and an enum as the
/// list of allowed literals:
///
/// ```yaml
/// user_id: int
/// gender: [Male, Female]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPropertyType", into = "RawPropertyType")]
pub enum PropertyType {
    Int,
    Float,
    String,
    /// Allowed string literals, stored as [`enum_hash`] integers.
    Enum(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPropertyType {
    Scalar(String),
    Enum(Vec<String>),
}

impl TryFrom<RawPropertyType> for PropertyType {
    type Error = String;

    fn try_from(raw: RawPropertyType) -> Result<Self, Self::Error> {
        match raw {
            RawPropertyType::Scalar(name) => match name.to_ascii_lowercase().as_str() {
                "int" => Ok(Self::Int),
                "float" => Ok(Self::Float),
                "string" => Ok(Self::String),
                other => Err(format!(
                    "unknown property type '{other}'; expected int, float, string or a list of values"
                )),
            },
            RawPropertyType::Enum(values) => Ok(Self::Enum(values)),
        }
    }
}

impl From<PropertyType> for RawPropertyType {
    fn from(ty: PropertyType) -> Self {
        match ty {
            PropertyType::Int => Self::Scalar("int".to_string()),
            PropertyType::Float => Self::Scalar("float".to_string()),
            PropertyType::String => Self::Scalar("string".to_string()),
            PropertyType::Enum(values) => Self::Enum(values),
        }
    }
}

impl PropertyType {
    /// Physical column type backing this property. Enums are stored as integers.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Int | Self::Enum(_) => ColumnType::Int,
            Self::Float => ColumnType::Float,
            Self::String => ColumnType::String,
        }
    }

    /// Whether a dynamically typed value matches this declaration.
    ///
    /// Integers are not accepted for `float` properties and vice versa.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Int => value.as_i64().is_some(),
            Self::Float => value.is_f64(),
            Self::String => value.is_string(),
            Self::Enum(values) => value
                .as_str()
                .is_some_and(|s| values.iter().any(|v| v == s)),
        }
    }

    /// Convert an accepted value to its stored form.
    pub fn to_column_value(&self, value: &Value) -> Option<ColumnValue> {
        if !self.accepts(value) {
            return None;
        }
        match self {
            Self::Int => value.as_i64().map(ColumnValue::Int),
            Self::Float => value.as_f64().map(ColumnValue::Float),
            Self::String => value.as_str().map(ColumnValue::from),
            Self::Enum(_) => value.as_str().map(|s| ColumnValue::Int(enum_hash(s))),
        }
    }

    /// Convert a stored value back. Enum hashes resolve to their literal when
    /// one of the declared values matches.
    pub fn from_column_value(&self, value: &ColumnValue) -> Option<Value> {
        match (self, value) {
            (_, ColumnValue::Null) => None,
            (Self::Enum(values), ColumnValue::Int(hash)) => Some(
                values
                    .iter()
                    .find(|v| enum_hash(v) == *hash)
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or_else(|| Value::Number((*hash).into())),
            ),
            (_, ColumnValue::Int(v)) => Some(Value::Number((*v).into())),
            (_, ColumnValue::Float(v)) => Number::from_f64(*v).map(Value::Number),
            (_, ColumnValue::Text(v)) => Some(Value::String(v.clone())),
        }
    }
}

// =============================================================================
// Column Pool
// =============================================================================

fn default_int_columns() -> u32 {
    6
}

fn default_float_columns() -> u32 {
    3
}

fn default_string_columns() -> u32 {
    6
}

fn default_string_max_len() -> u32 {
    255
}

/// Sizes of the typed slot column pool present in every event table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Number of `int_N` columns (default: 6).
    #[serde(default = "default_int_columns")]
    pub int_columns: u32,

    /// Number of `float_N` columns (default: 3).
    #[serde(default = "default_float_columns")]
    pub float_columns: u32,

    /// Number of `string_N` columns (default: 6).
    #[serde(default = "default_string_columns")]
    pub string_columns: u32,

    /// Maximum length of string columns (default: 255).
    #[serde(default = "default_string_max_len")]
    pub string_max_len: u32,
}

impl Default for ColumnMeta {
    fn default() -> Self {
        Self {
            int_columns: default_int_columns(),
            float_columns: default_float_columns(),
            string_columns: default_string_columns(),
            string_max_len: default_string_max_len(),
        }
    }
}

impl ColumnMeta {
    /// Number of slot columns available for a type.
    pub fn capacity(&self, column_type: ColumnType) -> u32 {
        match column_type {
            ColumnType::Int => self.int_columns,
            ColumnType::Float => self.float_columns,
            ColumnType::String => self.string_columns,
        }
    }
}

// =============================================================================
// Definitions
// =============================================================================

/// One event type and its own (non-common) properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDefinition {
    pub name: String,
    pub properties: BTreeMap<String, PropertyType>,
}

impl EventDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.properties.insert(name.into(), ty);
        self
    }
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    meta: ColumnMeta,
    #[serde(default)]
    common_properties: BTreeMap<String, PropertyType>,
    #[serde(default)]
    events: BTreeMap<String, Option<BTreeMap<String, serde_yaml::Value>>>,
}

/// The complete logical schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDefinition {
    pub meta: ColumnMeta,
    pub common_properties: BTreeMap<String, PropertyType>,
    pub events: BTreeMap<String, EventDefinition>,
}

impl SchemaDefinition {
    /// Load and validate a schema file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML schema.
    ///
    /// Keys starting with `_` inside an event are annotations and are skipped.
    pub fn from_yaml(content: &str) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_yaml::from_str(content)?;

        let mut events = BTreeMap::new();
        for (name, props) in raw.events {
            let mut def = EventDefinition::new(&name);
            for (prop, value) in props.unwrap_or_default() {
                if prop.starts_with('_') {
                    continue;
                }
                let ty: PropertyType = serde_yaml::from_value(value).map_err(|e| {
                    SchemaError::Definition(format!("{name}.{prop}: {e}"))
                })?;
                def.properties.insert(prop, ty);
            }
            events.insert(name, def);
        }

        let schema = Self {
            meta: raw.meta,
            common_properties: raw.common_properties,
            events,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Add an event definition.
    pub fn with_event(mut self, event: EventDefinition) -> Self {
        self.events.insert(event.name.clone(), event);
        self
    }

    /// Add a common property.
    pub fn with_common_property(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.common_properties.insert(name.into(), ty);
        self
    }

    /// Validate definitions.
    ///
    /// # Errors
    /// Returns `SchemaError::Definition` for empty or duplicated enum values
    /// and for common properties that collide with reserved or slot columns.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for name in self.common_properties.keys() {
            if RESERVED_COLUMNS.contains(&name.as_str()) || name.parse::<SlotColumn>().is_ok() {
                return Err(SchemaError::Definition(format!(
                    "common property '{name}' collides with a reserved column name"
                )));
            }
        }

        let all_props = self.common_properties.iter().chain(
            self.events
                .values()
                .flat_map(|e| e.properties.iter()),
        );
        for (name, ty) in all_props {
            if let PropertyType::Enum(values) = ty {
                if values.is_empty() {
                    return Err(SchemaError::Definition(format!(
                        "enum property '{name}' has no values"
                    )));
                }
                let unique: BTreeSet<&String> = values.iter().collect();
                if unique.len() != values.len() {
                    return Err(SchemaError::Definition(format!(
                        "enum property '{name}' has duplicate values"
                    )));
                }
            }
        }

        for event in self.events.values() {
            if event.name.is_empty() {
                return Err(SchemaError::Definition("empty event name".to_string()));
            }
        }

        Ok(())
    }

    /// Effective type of a property of an event (common properties win).
    pub fn property_type(&self, event: &str, property: &str) -> Option<&PropertyType> {
        self.common_properties.get(property).or_else(|| {
            self.events
                .get(event)
                .and_then(|e| e.properties.get(property))
        })
    }

    /// Properties of an event that need a slot column, in sorted order.
    pub fn slotted_properties<'a>(
        &'a self,
        event: &'a EventDefinition,
    ) -> impl Iterator<Item = (&'a String, &'a PropertyType)> + 'a {
        event
            .properties
            .iter()
            .filter(|(name, _)| !self.common_properties.contains_key(*name))
    }
}

// =============================================================================
// Events
// =============================================================================

/// An inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type name.
    pub event_name: String,
    /// Epoch seconds; defaulted to ingestion time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    /// Property values keyed by property name.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Event {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            event_time: None,
            properties: Map::new(),
        }
    }

    pub fn with_time(mut self, event_time: i64) -> Self {
        self.event_time = Some(event_time);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}
