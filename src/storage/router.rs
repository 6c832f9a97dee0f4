//! Distributed store router.
//!
//! Owns the fixed, ordered list of backing stores and routes every operation
//! to the subset selected by its [`Distribution`].

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::storage::{ColumnSpec, Filter, Row, StorageError, StoreAdapter};

/// Shard selection policy for a routed operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Distribution {
    /// Exactly one randomly chosen shard.
    #[default]
    Any,
    /// Every shard.
    All,
    /// The designated primary (index 0).
    Primary,
}

/// Router over an ordered set of stores.
#[derive(Clone)]
pub struct DistStore {
    stores: Vec<Arc<dyn StoreAdapter>>,
}

impl std::fmt::Debug for DistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistStore")
            .field(
                "stores",
                &self.stores.iter().map(|s| s.describe()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl DistStore {
    /// Create a router. Order matters: index 0 is the primary.
    ///
    /// # Errors
    /// Returns `StorageError::NoShards` if `stores` is empty.
    pub fn new(stores: Vec<Arc<dyn StoreAdapter>>) -> Result<Self, StorageError> {
        if stores.is_empty() {
            return Err(StorageError::NoShards);
        }
        Ok(Self { stores })
    }

    /// Number of configured shards.
    pub fn shard_count(&self) -> usize {
        self.stores.len()
    }

    /// Resolve the shard indexes targeted by a policy.
    fn targets(&self, dist: Distribution) -> Vec<usize> {
        match dist {
            Distribution::All => (0..self.stores.len()).collect(),
            Distribution::Any => vec![rand::thread_rng().gen_range(0..self.stores.len())],
            Distribution::Primary => vec![0],
        }
    }

    /// Check table existence; true only if every targeted shard reports it.
    pub async fn table_exists(&self, name: &str, dist: Distribution) -> Result<bool, StorageError> {
        for idx in self.targets(dist) {
            let exists = self.stores[idx]
                .table_exists(name)
                .await
                .map_err(|e| e.on_shard(idx))?;
            if !exists {
                tracing::debug!(table = %name, shard = idx, "Table missing on shard");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Create a table on every targeted shard.
    pub async fn create_table(
        &self,
        name: &str,
        columns: &[ColumnSpec],
        dist: Distribution,
    ) -> Result<(), StorageError> {
        for idx in self.targets(dist) {
            self.stores[idx]
                .create_table(name, columns)
                .await
                .map_err(|e| e.on_shard(idx))?;
        }
        Ok(())
    }

    /// Select from every targeted shard and concatenate the results in shard order.
    pub async fn select(
        &self,
        table: &str,
        filter: &Filter,
        dist: Distribution,
    ) -> Result<Vec<Row>, StorageError> {
        let mut rows = Vec::new();
        for idx in self.targets(dist) {
            let shard_rows = self.stores[idx]
                .select(table, filter)
                .await
                .map_err(|e| e.on_shard(idx))?;
            rows.extend(shard_rows);
        }
        Ok(rows)
    }

    /// Insert rows on every targeted shard.
    ///
    /// Every target is attempted even after a failure; the first failure is
    /// returned. Shards that succeeded keep their rows.
    pub async fn bulk_insert(
        &self,
        table: &str,
        rows: &[Row],
        dist: Distribution,
    ) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for idx in self.targets(dist) {
            if let Err(e) = self.stores[idx].bulk_insert(table, rows).await {
                tracing::error!(
                    table = %table,
                    shard = idx,
                    store = %self.stores[idx].describe(),
                    rows = rows.len(),
                    error = %e,
                    "Bulk insert failed on shard"
                );
                first_error.get_or_insert(e.on_shard(idx));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close every store.
    pub async fn close(&self) {
        for store in &self.stores {
            store.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ColumnType, ColumnValue, MemoryStore};
    use std::str::FromStr;

    fn shards(n: usize) -> (Vec<Arc<MemoryStore>>, DistStore) {
        let stores: Vec<Arc<MemoryStore>> = (0..n)
            .map(|i| Arc::new(MemoryStore::new(format!("shard{i}"))))
            .collect();
        let dyn_stores = stores
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn StoreAdapter>)
            .collect();
        (stores, DistStore::new(dyn_stores).unwrap())
    }

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("name", ColumnType::String),
        ]
    }

    fn row(name: &str) -> Row {
        [("name".to_string(), ColumnValue::from(name))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_distribution_from_str() {
        assert_eq!(Distribution::from_str("any").unwrap(), Distribution::Any);
        assert_eq!(Distribution::from_str("ALL").unwrap(), Distribution::All);
        assert_eq!(
            Distribution::from_str("Primary").unwrap(),
            Distribution::Primary
        );
        assert!(Distribution::from_str("random").is_err());
    }

    #[test]
    fn test_empty_router_rejected() {
        assert!(matches!(DistStore::new(vec![]), Err(StorageError::NoShards)));
    }

    #[tokio::test]
    async fn test_exists_requires_all_shards() {
        let (stores, router) = shards(3);
        stores[0].create_table("t", &columns()).await.unwrap();
        stores[1].create_table("t", &columns()).await.unwrap();

        assert!(!router.table_exists("t", Distribution::All).await.unwrap());

        stores[2].create_table("t", &columns()).await.unwrap();
        assert!(router.table_exists("t", Distribution::All).await.unwrap());
    }

    #[tokio::test]
    async fn test_primary_touches_only_first_shard() {
        let (stores, router) = shards(3);
        router
            .create_table("t", &columns(), Distribution::All)
            .await
            .unwrap();
        router
            .bulk_insert("t", &[row("a")], Distribution::Primary)
            .await
            .unwrap();
        router
            .select("t", &Filter::new(), Distribution::Primary)
            .await
            .unwrap();

        assert_eq!(stores[0].calls().bulk_insert, 1);
        assert_eq!(stores[0].calls().select, 1);
        for store in &stores[1..] {
            assert_eq!(store.calls().bulk_insert, 0);
            assert_eq!(store.calls().select, 0);
        }
    }

    #[tokio::test]
    async fn test_any_touches_exactly_one_shard() {
        let (stores, router) = shards(4);
        router
            .create_table("t", &columns(), Distribution::All)
            .await
            .unwrap();
        for _ in 0..10 {
            router
                .bulk_insert("t", &[row("a")], Distribution::Any)
                .await
                .unwrap();
        }
        let total: u64 = stores.iter().map(|s| s.calls().bulk_insert).sum();
        assert_eq!(total, 10);
        let rows: usize = stores.iter().map(|s| s.row_count("t")).sum();
        assert_eq!(rows, 10);
    }

    #[tokio::test]
    async fn test_select_concatenates_shards() {
        let (_stores, router) = shards(2);
        router
            .create_table("t", &columns(), Distribution::All)
            .await
            .unwrap();
        router
            .bulk_insert("t", &[row("a"), row("b")], Distribution::All)
            .await
            .unwrap();

        let all = router
            .select("t", &Filter::new(), Distribution::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);

        let filter: Filter = [("name".to_string(), ColumnValue::from("zzz"))]
            .into_iter()
            .collect();
        let none = router.select("t", &filter, Distribution::All).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_insert_failure_surfaces_with_shard() {
        let (stores, router) = shards(2);
        router
            .create_table("t", &columns(), Distribution::All)
            .await
            .unwrap();
        stores[1].set_unavailable(true);

        let err = router
            .bulk_insert("t", &[row("a")], Distribution::All)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Shard { shard: 1, .. }));
        // The healthy shard still received the write.
        assert_eq!(stores[0].row_count("t"), 1);
    }
}
