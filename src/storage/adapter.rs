//! Store adapter contract and the row types that cross it.
//!
//! A store adapter is one physical database. The router only needs four
//! capabilities from it: existence checks, table creation, equality-filtered
//! selects and bulk inserts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::storage::StorageError;

/// A column-name keyed row.
pub type Row = BTreeMap<String, ColumnValue>;

/// Equality filter: every listed column must equal the given value.
pub type Filter = BTreeMap<String, ColumnValue>;

/// Logical column type, mapped to a native type by each adapter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit signed integer.
    Int,
    /// Double precision float.
    Float,
    /// Text, optionally length-limited.
    String,
}

/// Column definition used when creating a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub column_type: ColumnType,
    /// Maximum length for string columns.
    pub max_len: Option<u32>,
    /// Whether this column is the (auto-assigned) primary key.
    pub primary_key: bool,
}

impl ColumnSpec {
    /// Create a plain, nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            max_len: None,
            primary_key: false,
        }
    }

    /// Create an auto-assigned integer primary key column.
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Int,
            max_len: None,
            primary_key: true,
        }
    }

    /// Limit the length of a string column.
    pub fn with_max_len(mut self, max_len: u32) -> Self {
        self.max_len = Some(max_len);
        self
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl ColumnValue {
    /// Whether the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Per-engine storage capability.
///
/// Implementations must treat `create_table` on an existing table as
/// success, since concurrent flushes may race to create the same table.
#[async_trait]
pub trait StoreAdapter: Send + Sync + 'static {
    /// Short description for logs (never includes credentials).
    fn describe(&self) -> String;

    /// Check whether a table exists.
    async fn table_exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Create a table if it does not already exist.
    async fn create_table(&self, name: &str, columns: &[ColumnSpec]) -> Result<(), StorageError>;

    /// Select all rows matching every column of `filter`.
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StorageError>;

    /// Insert all rows. Columns missing from a row are stored as NULL.
    async fn bulk_insert(&self, table: &str, rows: &[Row]) -> Result<(), StorageError>;

    /// Release connections. Default is a no-op.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_column_type_from_str() {
        assert_eq!(ColumnType::from_str("int").unwrap(), ColumnType::Int);
        assert_eq!(ColumnType::from_str("float").unwrap(), ColumnType::Float);
        assert_eq!(ColumnType::from_str("string").unwrap(), ColumnType::String);
        assert!(ColumnType::from_str("blob").is_err());
    }

    #[test]
    fn test_column_type_as_str() {
        assert_eq!(ColumnType::Int.as_ref(), "int");
        assert_eq!(ColumnType::String.to_string(), "string");
    }

    #[test]
    fn test_column_spec_builders() {
        let pk = ColumnSpec::primary_key("id");
        assert!(pk.primary_key);
        assert_eq!(pk.column_type, ColumnType::Int);

        let s = ColumnSpec::new("string_0", ColumnType::String).with_max_len(64);
        assert_eq!(s.max_len, Some(64));
        assert!(!s.primary_key);
    }

    #[test]
    fn test_column_value_serde_untagged() {
        let row: Row = [
            ("a".to_string(), ColumnValue::Int(3)),
            ("b".to_string(), ColumnValue::Text("x".into())),
            ("c".to_string(), ColumnValue::Null),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json, serde_json::json!({"a": 3, "b": "x", "c": null}));
    }
}
