//! Per-key query statistics.
//!
//! Rolling counters per cache key: accesses, loads, cumulative load latency,
//! and an operator-assigned volatility class. The tracked population is
//! capped; when full, the least-recently-accessed key is dropped to make
//! room. Feeding the admin surface and warming priorities is the point, so
//! the numbers are advisory, not transactional.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How frequently a query family's underlying data changes.
///
/// Drives the default TTL when a caller does not pin one. Assigned by
/// operators per query family; learned classification is a future extension,
/// not something this tracker does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Volatility {
    High,
    #[default]
    Medium,
    Low,
}

/// Rolling counters for one cache key.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStat {
    pub access_count: u64,
    pub hit_count: u64,
    pub load_count: u64,
    pub total_load_time_ms: u64,
    pub last_access_ms: i64,
    pub volatility: Volatility,
}

impl QueryStat {
    fn new(volatility: Volatility) -> Self {
        Self {
            access_count: 0,
            hit_count: 0,
            load_count: 0,
            total_load_time_ms: 0,
            last_access_ms: 0,
            volatility,
        }
    }

    /// Mean loader latency in milliseconds, zero before the first load.
    pub fn avg_load_time_ms(&self) -> f64 {
        if self.load_count == 0 {
            0.0
        } else {
            self.total_load_time_ms as f64 / self.load_count as f64
        }
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Tracker over all observed keys, bounded to `capacity` entries.
#[derive(Debug)]
pub struct QueryStatsTracker {
    entries: DashMap<String, QueryStat>,
    capacity: usize,
}

impl QueryStatsTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Records one access. `load_time` is present when the loader ran.
    pub fn record_access(&self, key: &str, hit: bool, load_time: Option<Duration>) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_least_recent();
        }

        let mut stat = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| QueryStat::new(Volatility::default()));
        stat.access_count += 1;
        stat.last_access_ms = now_ms();
        if hit {
            stat.hit_count += 1;
        }
        if let Some(elapsed) = load_time {
            stat.load_count += 1;
            stat.total_load_time_ms += elapsed.as_millis() as u64;
        }
    }

    /// Assigns the volatility class for a key, creating the entry if new.
    pub fn set_volatility(&self, key: &str, volatility: Volatility) {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| QueryStat::new(volatility))
            .volatility = volatility;
    }

    /// The volatility class for a key, `Medium` when untracked.
    pub fn classify_volatility(&self, key: &str) -> Volatility {
        self.entries
            .get(key)
            .map(|s| s.volatility)
            .unwrap_or_default()
    }

    /// Snapshot for one key.
    pub fn get(&self, key: &str) -> Option<QueryStat> {
        self.entries.get(key).map(|s| s.clone())
    }

    /// The `n` most-accessed keys, descending.
    pub fn top_by_access(&self, n: usize) -> Vec<(String, QueryStat)> {
        let mut all: Vec<(String, QueryStat)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| b.1.access_count.cmp(&a.1.access_count));
        all.truncate(n);
        all
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all counters.
    pub fn clear(&self) {
        self.entries.clear();
    }

    // O(n) scan; runs only when the tracked population is at capacity.
    fn evict_least_recent(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().last_access_ms)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
