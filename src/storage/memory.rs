//! In-process store adapter.
//!
//! Keeps tables in memory and counts every call, which makes it useful both
//! as a scratch shard (`memory://name`) and for asserting routing behaviour.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::storage::{ColumnSpec, ColumnValue, Filter, Row, StorageError, StoreAdapter};

/// Snapshot of per-operation call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub table_exists: u64,
    pub create_table: u64,
    pub select: u64,
    pub bulk_insert: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    table_exists: AtomicU64,
    create_table: AtomicU64,
    select: AtomicU64,
    bulk_insert: AtomicU64,
}

#[derive(Debug)]
struct MemTable {
    columns: Vec<ColumnSpec>,
    rows: Vec<Row>,
    next_id: i64,
}

/// Memory-backed store with call instrumentation.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    tables: Mutex<HashMap<String, MemTable>>,
    calls: CallCounters,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Mutex::new(HashMap::new()),
            calls: CallCounters::default(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Current call counts.
    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            table_exists: self.calls.table_exists.load(Ordering::Relaxed),
            create_table: self.calls.create_table.load(Ordering::Relaxed),
            select: self.calls.select.load(Ordering::Relaxed),
            bulk_insert: self.calls.bulk_insert.load(Ordering::Relaxed),
        }
    }

    /// Make every subsequent write and read fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of rows in a table (0 if missing).
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn describe(&self) -> String {
        format!("memory://{}", self.name)
    }

    async fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        self.calls.table_exists.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        Ok(self.lock().contains_key(name))
    }

    async fn create_table(&self, name: &str, columns: &[ColumnSpec]) -> Result<(), StorageError> {
        self.calls.create_table.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.lock().entry(name.to_string()).or_insert_with(|| MemTable {
            columns: columns.to_vec(),
            rows: Vec::new(),
            next_id: 1,
        });
        Ok(())
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StorageError> {
        self.calls.select.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        let tables = self.lock();
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        if let Some(unknown) = filter
            .keys()
            .find(|k| !t.columns.iter().any(|c| &c.name == *k))
        {
            return Err(StorageError::InvalidData(format!(
                "unknown column '{unknown}' in table '{table}'"
            )));
        }

        Ok(t.rows
            .iter()
            .filter(|row| {
                filter
                    .iter()
                    .all(|(col, want)| !want.is_null() && row.get(col) == Some(want))
            })
            .cloned()
            .collect())
    }

    async fn bulk_insert(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        self.calls.bulk_insert.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        // Validate the whole batch before touching the table.
        for row in rows {
            if let Some(unknown) = row
                .keys()
                .find(|k| !t.columns.iter().any(|c| &c.name == *k))
            {
                return Err(StorageError::InvalidData(format!(
                    "unknown column '{unknown}' in table '{table}'"
                )));
            }
        }

        for row in rows {
            let mut stored = Row::new();
            for column in &t.columns {
                let value = if column.primary_key {
                    match row.get(&column.name) {
                        Some(ColumnValue::Int(id)) => {
                            t.next_id = t.next_id.max(id + 1);
                            ColumnValue::Int(*id)
                        }
                        _ => {
                            let id = t.next_id;
                            t.next_id += 1;
                            ColumnValue::Int(id)
                        }
                    }
                } else {
                    row.get(&column.name).cloned().unwrap_or(ColumnValue::Null)
                };
                stored.insert(column.name.clone(), value);
            }
            t.rows.push(stored);
        }
        Ok(())
    }
}
