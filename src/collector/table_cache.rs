//! Bounded table-existence cache.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

#[derive(Debug, Clone, Copy)]
struct Entry {
    exists: bool,
    stored_at: Instant,
}

/// LRU cache of table existence with per-entry expiry.
///
/// A hit lets the flush path skip the existence round-trip to every shard.
#[derive(Debug)]
pub struct TableCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl TableCache {
    /// Create a cache holding at most `capacity` tables (minimum 1).
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached existence of a table, or `None` on a miss or expired entry.
    pub fn get(&self, table: &str) -> Option<bool> {
        let mut entries = self.lock();
        match entries.get(table) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.exists),
            Some(_) => {
                entries.pop(table);
                None
            }
            None => None,
        }
    }

    /// Whether a table is known to exist.
    pub fn contains(&self, table: &str) -> bool {
        self.get(table) == Some(true)
    }

    pub fn insert(&self, table: impl Into<String>, exists: bool) {
        self.lock().put(
            table.into(),
            Entry {
                exists,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, table: &str) {
        self.lock().pop(table);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
