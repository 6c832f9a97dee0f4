//! Ingestion against on-disk SQLite shards.

use std::sync::Arc;

use sluice::storage::connect_all;
use sluice::{
    Collector, CollectorConfig, Distribution, Event, SchemaDefinition, SchemaMapper, TableTimezone,
};
use tempfile::TempDir;

const SCHEMA: &str = r#"
meta:
  int_columns: 2
  float_columns: 1
  string_columns: 2
  string_max_len: 64
common_properties:
  os: [iOS, Android]
events:
  page_view:
    path: string
    duration: float
    _owner: web-team
"#;

fn shard_urls(dir: &TempDir, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("sqlite:{}?mode=rwc", dir.path().join(format!("shard{i}.db")).display()))
        .collect()
}

async fn mapper_for(urls: &[String]) -> Arc<SchemaMapper> {
    let store = Arc::new(connect_all(urls).await.unwrap());
    let schema = SchemaDefinition::from_yaml(SCHEMA).unwrap();
    let mapper = Arc::new(SchemaMapper::new(store, schema, TableTimezone::Utc));
    mapper.reconcile_mappings().await.unwrap();
    mapper
}

#[tokio::test]
async fn test_flush_and_read_back_from_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let urls = shard_urls(&dir, 2);
    let store = Arc::new(connect_all(&urls).await.unwrap());
    let schema = SchemaDefinition::from_yaml(SCHEMA).unwrap();
    let mapper = Arc::new(SchemaMapper::new(Arc::clone(&store), schema, TableTimezone::Utc));
    mapper.reconcile_mappings().await.unwrap();

    let collector = Collector::new(
        Arc::clone(&mapper),
        Arc::clone(&store),
        CollectorConfig::default().with_write_distribution(Distribution::All),
    );
    let event = Event::new("page_view")
        .with_time(1_718_000_000)
        .with_property("path", "/pricing")
        .with_property("duration", 1.25)
        .with_property("os", "Android");
    let result = collector.enqueue(vec![event.clone()]);
    assert_eq!(result.accepted, 1);

    let report = collector.flush_once().await;
    assert_eq!(report.records_written, 1, "{:?}", report.failures);

    let rows = store
        .select("events_20240610", &Default::default(), Distribution::All)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(mapper.from_physical_record(row).await.unwrap(), event);
    }

    // A second flush into the same day reuses the existing table.
    collector.enqueue(vec![event.clone().with_time(1_718_000_100)]);
    let report = collector.flush_once().await;
    assert_eq!(report.records_written, 1);
    store.close().await;
}

#[tokio::test]
async fn test_mappings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let urls = shard_urls(&dir, 1);

    let first = mapper_for(&urls).await;
    let before = first.mapping_for("page_view").await.unwrap();
    drop(first);

    let second = mapper_for(&urls).await;
    let after = second.mapping_for("page_view").await.unwrap();
    assert_eq!(*before, *after);
    assert_eq!(after.len(), 2);
}

#[tokio::test]
async fn test_ensure_table_twice_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let urls = shard_urls(&dir, 2);
    let mapper = mapper_for(&urls).await;

    assert!(mapper.ensure_table("events_20240101").await.unwrap());
    assert!(!mapper.ensure_table("events_20240101").await.unwrap());
}

#[tokio::test]
async fn test_nul_string_does_not_break_its_batch() {
    let dir = tempfile::tempdir().unwrap();
    let urls = shard_urls(&dir, 1);
    let store = Arc::new(connect_all(&urls).await.unwrap());
    let schema = SchemaDefinition::from_yaml(SCHEMA).unwrap();
    let mapper = Arc::new(SchemaMapper::new(Arc::clone(&store), schema, TableTimezone::Utc));
    mapper.reconcile_mappings().await.unwrap();
    let collector = Collector::new(Arc::clone(&mapper), Arc::clone(&store), CollectorConfig::default());

    let ok = Event::new("page_view")
        .with_time(1_718_000_000)
        .with_property("path", "/ok");
    let nul = Event::new("page_view")
        .with_time(1_718_000_001)
        .with_property("path", "nul\u{0}byte");
    assert_eq!(collector.enqueue(vec![ok.clone(), nul.clone()]).accepted, 2);

    let report = collector.flush_once().await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.records_written, 2);

    let rows = store
        .select("events_20240610", &Default::default(), Distribution::Primary)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let mut events = Vec::new();
    for row in &rows {
        events.push(mapper.from_physical_record(row).await.unwrap());
    }
    assert!(events.contains(&ok));
    assert!(events.contains(&nul));
}
