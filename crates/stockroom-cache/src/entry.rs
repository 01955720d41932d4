//! Cache entry value object and freshness math.

use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;

/// A single cached value with its tags and lifetime.
///
/// Entries are immutable once created; a refresh writes a new entry rather
/// than mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Full cache key.
    pub key: String,
    /// The cached value.
    pub value: Value,
    /// Tags this entry is registered under.
    pub tags: Vec<String>,
    /// When the entry was created.
    pub created_at: OffsetDateTime,
    /// When the entry stops being served.
    pub expires_at: OffsetDateTime,
    /// Marker entry for an opted-in cached negative result.
    pub negative: bool,
}

impl CacheEntry {
    /// Creates an entry expiring `ttl` from now.
    pub fn new(key: impl Into<String>, value: Value, tags: Vec<String>, ttl: Duration) -> Self {
        let created_at = OffsetDateTime::now_utc();
        Self {
            key: key.into(),
            value,
            tags,
            created_at,
            expires_at: created_at + ttl,
            negative: false,
        }
    }

    /// Creates a negative marker entry (null value, short TTL).
    pub fn negative_marker(key: impl Into<String>, tags: Vec<String>, ttl: Duration) -> Self {
        let mut entry = Self::new(key, Value::Null, tags, ttl);
        entry.negative = true;
        entry
    }

    /// Time since the entry was created.
    pub fn age(&self) -> Duration {
        let elapsed = OffsetDateTime::now_utc() - self.created_at;
        let ms = elapsed.whole_milliseconds();
        if ms <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(ms as u64)
        }
    }

    /// Whether the entry's TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining_ttl(&self) -> Duration {
        let remaining = self.expires_at - OffsetDateTime::now_utc();
        let ms = remaining.whole_milliseconds();
        if ms <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(ms as u64)
        }
    }

    /// Fraction of the original TTL still remaining, clamped to `[0, 1]`.
    ///
    /// The refresh-ahead path compares this against the policy threshold; an
    /// entry created with a zero TTL reports `0.0`.
    pub fn remaining_ttl_fraction(&self) -> f64 {
        let total = (self.expires_at - self.created_at).whole_milliseconds();
        if total <= 0 {
            return 0.0;
        }
        let remaining = (self.expires_at - OffsetDateTime::now_utc()).whole_milliseconds();
        (remaining.max(0) as f64 / total as f64).clamp(0.0, 1.0)
    }
}
