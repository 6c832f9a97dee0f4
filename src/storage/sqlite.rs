//! SQLite backend implementation using sqlx.
//!
//! Statements are built with sea-query since table and column names are
//! only known at runtime. Values are always bound, never inlined.
//!
//! sea-query statements are not `Send`, so each one is consumed by a sync
//! `build_*` helper before the first `.await`.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sea_query::{
    Alias, Asterisk, ColumnDef, Expr, InsertStatement, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder, Table, TableCreateStatement,
};
use sea_query_binder::{SqlxBinder, SqlxValues};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use crate::storage::{ColumnSpec, ColumnType, ColumnValue, Filter, Row, StorageError, StoreAdapter};

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Rows per INSERT statement.
const INSERT_CHUNK_ROWS: usize = 500;

/// SQLite's default cap on bound parameters per statement.
const MAX_BIND_PARAMS: usize = 32_766;

/// SQLite store adapter.
///
/// File databases use WAL mode and a small pool. In-memory databases are
/// pinned to a single long-lived connection, since every new SQLite
/// connection to `:memory:` would open a fresh, empty database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    url: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Connect to a SQLite database.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/shard0.db?mode=rwc`
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(DEFAULT_CONNECT_TIMEOUT);
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(DEFAULT_MAX_CONNECTIONS)
        };

        let pool = pool_options.connect_with(options).await?;
        tracing::debug!(url = %url, in_memory, "SQLite store connected");

        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn to_sql_value(value: &ColumnValue) -> sea_query::Value {
    match value {
        ColumnValue::Null => sea_query::Value::BigInt(None),
        ColumnValue::Int(v) => (*v).into(),
        ColumnValue::Float(v) => (*v).into(),
        ColumnValue::Text(v) => v.clone().into(),
    }
}

fn column_def(spec: &ColumnSpec) -> ColumnDef {
    let mut def = ColumnDef::new(Alias::new(spec.name.as_str()));
    match (spec.column_type, spec.max_len) {
        // SQLite only aliases the rowid for a column declared exactly INTEGER.
        (ColumnType::Int, _) if spec.primary_key => def.integer(),
        (ColumnType::Int, _) => def.big_integer(),
        (ColumnType::Float, _) => def.double(),
        (ColumnType::String, Some(len)) => def.string_len(len),
        (ColumnType::String, None) => def.text(),
    };
    if spec.primary_key {
        def.not_null().primary_key().auto_increment();
    }
    def
}

fn decode_row(row: &SqliteRow) -> Result<Row, StorageError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            ColumnValue::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "BIGINT" | "INT" | "BOOLEAN" => ColumnValue::Int(row.try_get(idx)?),
                "REAL" | "DOUBLE" | "FLOAT" => ColumnValue::Float(row.try_get(idx)?),
                "TEXT" | "VARCHAR" => ColumnValue::Text(row.try_get(idx)?),
                other => {
                    return Err(StorageError::InvalidData(format!(
                        "unsupported SQLite value type '{}' in column '{}'",
                        other,
                        column.name()
                    )));
                }
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn build_create(stmt: TableCreateStatement) -> String {
    stmt.to_string(SqliteQueryBuilder)
}

fn build_select(stmt: SelectStatement) -> (String, SqlxValues) {
    stmt.build_sqlx(SqliteQueryBuilder)
}

fn build_insert(stmt: InsertStatement) -> (String, SqlxValues) {
    stmt.build_sqlx(SqliteQueryBuilder)
}

fn create_table_sql(name: &str, columns: &[ColumnSpec]) -> String {
    let mut stmt = Table::create();
    stmt.table(Alias::new(name)).if_not_exists();
    for spec in columns {
        stmt.col(&mut column_def(spec));
    }
    build_create(stmt)
}

fn select_sql(table: &str, filter: &Filter) -> (String, SqlxValues) {
    let mut query = Query::select();
    query.column(Asterisk).from(Alias::new(table));
    for (column, value) in filter {
        query.and_where(Expr::col(Alias::new(column.as_str())).eq(to_sql_value(value)));
    }
    build_select(query)
}

fn insert_sql(
    table: &str,
    columns: &[String],
    rows: &[Row],
) -> Result<(String, SqlxValues), StorageError> {
    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(table))
        .columns(columns.iter().map(|c| Alias::new(c.as_str())));
    for row in rows {
        let values: Vec<SimpleExpr> = columns
            .iter()
            .map(|c| {
                row.get(c)
                    .map(to_sql_value)
                    .unwrap_or(sea_query::Value::BigInt(None))
                    .into()
            })
            .collect();
        insert.values(values)?;
    }
    Ok(build_insert(insert))
}

#[async_trait]
impl StoreAdapter for SqliteStore {
    fn describe(&self) -> String {
        // Strip query parameters, which may carry credentials for other drivers.
        self.url.split('?').next().unwrap_or_default().to_string()
    }

    async fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn create_table(&self, name: &str, columns: &[ColumnSpec]) -> Result<(), StorageError> {
        let sql = create_table_sql(name, columns);
        sqlx::query(&sql).execute(&self.pool).await?;
        tracing::debug!(table = %name, columns = columns.len(), "SQLite table ensured");
        Ok(())
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StorageError> {
        let (sql, values) = select_sql(table, filter);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn bulk_insert(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let columns: Vec<String> = rows
            .iter()
            .flat_map(|r| r.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let chunk_rows = (MAX_BIND_PARAMS / columns.len().max(1)).clamp(1, INSERT_CHUNK_ROWS);
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(chunk_rows) {
            let (sql, values) = insert_sql(table, &columns, chunk)?;
            sqlx::query_with(&sql, values).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("event_name", ColumnType::String).with_max_len(255),
            ColumnSpec::new("int_0", ColumnType::Int),
            ColumnSpec::new("float_0", ColumnType::Float),
        ]
    }

    #[tokio::test]
    async fn test_sqlite_store_connect() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        assert!(!store.is_closed());

        let row: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(store.inner())
            .await
            .unwrap();
        assert_eq!(row.0, 1);

        store.close().await;
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_create_table_twice() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        assert!(!store.table_exists("events_20240101").await.unwrap());

        store
            .create_table("events_20240101", &columns())
            .await
            .unwrap();
        store
            .create_table("events_20240101", &columns())
            .await
            .unwrap();

        assert!(store.table_exists("events_20240101").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_and_select_roundtrip() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.create_table("t", &columns()).await.unwrap();

        let rows: Vec<Row> = vec![
            [
                ("event_name".to_string(), ColumnValue::from("a")),
                ("int_0".to_string(), ColumnValue::Int(42)),
                ("float_0".to_string(), ColumnValue::Float(1.5)),
            ]
            .into(),
            [("event_name".to_string(), ColumnValue::from("b"))].into(),
        ];
        store.bulk_insert("t", &rows).await.unwrap();

        let filter: Filter = [("event_name".to_string(), ColumnValue::from("a"))].into();
        let found = store.select("t", &filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], ColumnValue::Int(1));
        assert_eq!(found[0]["int_0"], ColumnValue::Int(42));
        assert_eq!(found[0]["float_0"], ColumnValue::Float(1.5));

        let filter: Filter = [("event_name".to_string(), ColumnValue::from("b"))].into();
        let found = store.select("t", &filter).await.unwrap();
        assert_eq!(found[0]["int_0"], ColumnValue::Null);
    }

    #[tokio::test]
    async fn test_large_insert_is_chunked() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.create_table("t", &columns()).await.unwrap();

        let rows: Vec<Row> = (0..1_234)
            .map(|i| [("int_0".to_string(), ColumnValue::Int(i))].into())
            .collect();
        store.bulk_insert("t", &rows).await.unwrap();

        let all = store.select("t", &Filter::new()).await.unwrap();
        assert_eq!(all.len(), 1_234);
    }

    #[tokio::test]
    async fn test_values_are_bound_not_inlined() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.create_table("t", &columns()).await.unwrap();

        let awkward = ["nul\u{0}byte", "it's", "back\\slash", "line\nbreak", "\"quoted\""];
        let rows: Vec<Row> = awkward
            .iter()
            .map(|s| [("event_name".to_string(), ColumnValue::from(*s))].into())
            .collect();
        store.bulk_insert("t", &rows).await.unwrap();

        for s in awkward {
            let filter: Filter = [("event_name".to_string(), ColumnValue::from(s))].into();
            let found = store.select("t", &filter).await.unwrap();
            assert_eq!(found.len(), 1, "{s:?}");
            assert_eq!(found[0]["event_name"], ColumnValue::from(s));
        }
    }

    #[tokio::test]
    async fn test_insert_into_missing_table_fails() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let row: Row = [("int_0".to_string(), ColumnValue::Int(1))].into();
        assert!(matches!(
            store.bulk_insert("missing", &[row]).await,
            Err(StorageError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("shard.db").display());

        {
            let store = SqliteStore::connect(&url).await.unwrap();
            store.create_table("t", &columns()).await.unwrap();
            store.close().await;
        }

        let store = SqliteStore::connect(&url).await.unwrap();
        assert!(store.table_exists("t").await.unwrap());
        assert_eq!(store.describe(), url.split('?').next().unwrap());
    }
}
