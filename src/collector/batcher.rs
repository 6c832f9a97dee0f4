//! Batching collector: buffer validated events, flush them per daily table.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectorError, TableCache};
use crate::config::CollectorConfig;
use crate::schema::{Event, SchemaMapper, now_epoch};
use crate::storage::{DistStore, Row};

// =============================================================================
// Reports and Stats
// =============================================================================

/// Lifecycle state of a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CollectorState {
    /// Created, flush loop not started.
    Idle,
    /// Flush loop running, waiting for the next cycle.
    Buffering,
    /// A flush cycle is writing to storage.
    Flushing,
    /// Flush loop stopped.
    Stopped,
}

/// Result of one `enqueue` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnqueueResult {
    /// Number of events appended to the pending buffer.
    pub accepted: usize,
    /// Events rejected by schema validation, in input order.
    pub invalid_events: Vec<Event>,
}

/// A table whose records could not be written in a flush cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushFailure {
    /// Destination table, if it could be determined.
    pub table: Option<String>,
    /// Records dropped for this cycle.
    pub records: usize,
    pub error: String,
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Events taken from the pending buffer.
    pub drained: usize,
    /// Tables that received a bulk insert.
    pub tables_written: usize,
    /// Records successfully inserted.
    pub records_written: usize,
    pub failures: Vec<FlushFailure>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.drained == 0
    }
}

/// Point-in-time collector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    pub accepted: u64,
    pub rejected: u64,
    pub flushed: u64,
    pub failed: u64,
    pub flush_cycles: u64,
    pub pending: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    flushed: AtomicU64,
    failed: AtomicU64,
    flush_cycles: AtomicU64,
}

fn bump(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

// =============================================================================
// Collector
// =============================================================================

/// Buffers validated events and writes them in per-table bulk inserts.
///
/// `enqueue` only validates and appends under the buffer lock; all storage
/// I/O happens in flush cycles, which never overlap.
pub struct Collector {
    mapper: Arc<SchemaMapper>,
    store: Arc<DistStore>,
    config: CollectorConfig,
    pending: Mutex<Vec<Event>>,
    tables: TableCache,
    flush_lock: tokio::sync::Mutex<()>,
    state: Mutex<CollectorState>,
    counters: Counters,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("state", &self.state())
            .field("pending", &self.lock_pending().len())
            .field("cached_tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

impl Collector {
    pub fn new(mapper: Arc<SchemaMapper>, store: Arc<DistStore>, config: CollectorConfig) -> Self {
        let tables = TableCache::new(config.table_cache_size, config.table_cache_ttl);
        Self {
            mapper,
            store,
            config,
            pending: Mutex::new(Vec::new()),
            tables,
            flush_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(CollectorState::Idle),
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Event>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CollectorState) -> CollectorState {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, state)
    }

    pub fn state(&self) -> CollectorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> CollectorStats {
        let c = &self.counters;
        CollectorStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            flushed: c.flushed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            flush_cycles: c.flush_cycles.load(Ordering::Relaxed),
            pending: self.lock_pending().len() as u64,
        }
    }

    /// Table-existence cache used by the flush path.
    pub fn table_cache(&self) -> &TableCache {
        &self.tables
    }

    /// Validate events and append the valid ones to the pending buffer.
    ///
    /// Never touches storage. Accepted events without a time are stamped
    /// with the current time.
    pub fn enqueue(&self, events: impl IntoIterator<Item = Event>) -> EnqueueResult {
        let mut accepted = Vec::new();
        let mut invalid_events = Vec::new();

        for mut event in events {
            match self.mapper.check(&event) {
                Ok(()) => {
                    event.event_time.get_or_insert_with(now_epoch);
                    accepted.push(event);
                }
                Err(e) => {
                    tracing::debug!(event = %event.event_name, error = %e, "Rejected event");
                    invalid_events.push(event);
                }
            }
        }

        bump(&self.counters.accepted, accepted.len());
        bump(&self.counters.rejected, invalid_events.len());

        let result = EnqueueResult {
            accepted: accepted.len(),
            invalid_events,
        };
        if !accepted.is_empty() {
            self.lock_pending().append(&mut accepted);
        }
        result
    }

    /// Run one flush cycle: drain the buffer, group by table, write.
    ///
    /// Cycles are serialized; a call made while another cycle runs waits for
    /// it to finish. Failures are reported per table and do not stop the
    /// remaining tables from being written.
    pub async fn flush_once(&self) -> FlushReport {
        let _cycle = self.flush_lock.lock().await;

        let batch = std::mem::take(&mut *self.lock_pending());
        let mut report = FlushReport {
            drained: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return report;
        }

        let previous = self.set_state(CollectorState::Flushing);
        bump(&self.counters.flush_cycles, 1);

        let mut by_table: BTreeMap<String, Vec<Row>> = BTreeMap::new();
        for event in &batch {
            let table = match self.mapper.select_destination_table(event) {
                Ok(table) => table,
                Err(e) => {
                    tracing::warn!(event = %event.event_name, error = %e, "Cannot route event");
                    report.failures.push(FlushFailure {
                        table: None,
                        records: 1,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            match self.mapper.to_physical_record(event).await {
                Ok(row) => by_table.entry(table).or_default().push(row),
                Err(e) => {
                    tracing::warn!(event = %event.event_name, table = %table, error = %e, "Cannot convert event");
                    report.failures.push(FlushFailure {
                        table: Some(table),
                        records: 1,
                        error: e.to_string(),
                    });
                }
            }
        }

        for (table, rows) in by_table {
            match self.write_table(&table, &rows).await {
                Ok(()) => {
                    report.tables_written += 1;
                    report.records_written += rows.len();
                }
                Err(e) => {
                    tracing::error!(table = %table, records = rows.len(), error = %e, "Flush failed for table");
                    self.tables.invalidate(&table);
                    report.failures.push(FlushFailure {
                        table: Some(table),
                        records: rows.len(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let failed: usize = report.failures.iter().map(|f| f.records).sum();
        bump(&self.counters.flushed, report.records_written);
        bump(&self.counters.failed, failed);

        // Shutdown may have moved the state on while this cycle ran.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == CollectorState::Flushing {
            *state = previous;
        }
        drop(state);

        tracing::debug!(
            drained = report.drained,
            tables = report.tables_written,
            records = report.records_written,
            failed,
            "Flush cycle complete"
        );
        report
    }

    async fn write_table(&self, table: &str, rows: &[Row]) -> Result<(), CollectorError> {
        if !self.tables.contains(table) {
            self.mapper.ensure_table(table).await?;
            self.tables.insert(table, true);
        }
        self.store
            .bulk_insert(table, rows, self.config.write_distribution)
            .await?;
        Ok(())
    }

    /// Spawn the periodic flush loop.
    ///
    /// # Errors
    /// Returns `CollectorError::AlreadyStarted` if the loop was started before.
    pub fn start(self: &Arc<Self>) -> Result<(), CollectorError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || self.shutdown.is_cancelled() {
            return Err(CollectorError::AlreadyStarted);
        }

        self.set_state(CollectorState::Buffering);
        let collector = Arc::clone(self);
        *task = Some(tokio::spawn(async move { collector.run().await }));
        Ok(())
    }

    async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval = %humantime::format_duration(self.config.flush_interval),
            distribution = %self.config.write_distribution,
            "Flush loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.flush_once().await;
                    if !report.is_empty() {
                        // More events may have arrived during the write.
                        interval.reset_immediately();
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
        tracing::info!("Flush loop stopped");
    }

    /// Stop the flush loop after any in-flight cycle completes.
    ///
    /// Events still pending are not flushed.
    pub async fn shutdown(&self) -> Result<(), CollectorError> {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let joined = match task {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        self.set_state(CollectorState::Stopped);

        let pending = self.lock_pending().len();
        if pending > 0 {
            tracing::warn!(pending, "Collector stopped with unflushed events");
        }
        joined.map_err(CollectorError::from)
    }
}
