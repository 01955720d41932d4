//! Process-local cache tier (L1).
//!
//! A size-bounded moka cache holding a subset mirror of the distributed tier.
//! Eviction at capacity is moka's business; TTL comes from each entry and is
//! re-checked lazily on read. Misses are normal outcomes, the type has no
//! error channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::future::Cache;
use serde::Serialize;

use crate::entry::CacheEntry;

/// Per-entry expiry policy: the entry carries its own deadline.
struct EntryExpiry;

impl moka::Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining_ttl())
    }
}

/// The L1 cache.
pub struct LocalCache {
    cache: Cache<String, Arc<CacheEntry>>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("capacity", &self.capacity)
            .field("size", &self.cache.entry_count())
            .finish()
    }
}

impl LocalCache {
    /// Creates an L1 cache bounded to `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .expire_after(EntryExpiry)
                .build(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Looks up a live entry.
    ///
    /// Expiry is double-checked against the entry's own deadline, so a value
    /// moka has not collected yet still reads as a miss once stale.
    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        match self.cache.get(key).await {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                self.cache.invalidate(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores an entry. Entries that are already expired are dropped.
    pub async fn insert(&self, entry: Arc<CacheEntry>) {
        if entry.is_expired() {
            return;
        }
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.cache.insert(entry.key.clone(), entry).await;
    }

    /// Removes an entry, reporting whether a live one was present.
    pub async fn remove(&self, key: &str) -> bool {
        let present = matches!(self.cache.get(key).await, Some(e) if !e.is_expired());
        self.cache.invalidate(key).await;
        present
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Number of entries currently resident.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time counters for the admin surface.
    pub fn snapshot(&self) -> L1Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        L1Stats {
            size: self.cache.entry_count(),
            capacity: self.capacity,
            hits,
            misses,
            inserts: self.inserts.load(Ordering::Relaxed),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

/// Snapshot of L1 counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct L1Stats {
    pub size: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub hit_ratio: f64,
}
