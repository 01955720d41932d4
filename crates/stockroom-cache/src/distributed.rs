//! Distributed cache tier (L2).
//!
//! A thin client over the key-value backend: entries are serialized into a
//! JSON envelope, optionally compressed, and stored with the entry's
//! remaining TTL. The tier **fails open** — any backend or codec problem is
//! logged and counted, then reported to the caller as a miss (reads) or a
//! silent local-only degradation (writes). The cache must never be mistaken
//! for a system of record.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use stockroom_kv::DynKvBackend;

use crate::codec::CompressionCodec;
use crate::entry::CacheEntry;

/// Wire format stored in the backend.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry {
    key: String,
    #[serde(default)]
    tags: Vec<String>,
    created_at_ms: i64,
    expires_at_ms: i64,
    compressed: bool,
    #[serde(default)]
    negative: bool,
    /// Inline JSON text, or base64 of the compressed JSON when `compressed`.
    payload: String,
}

fn to_unix_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_ms(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// The L2 cache client.
pub struct DistributedCache {
    backend: DynKvBackend,
    codec: Arc<dyn CompressionCodec>,
    /// Payloads smaller than this skip compression even when enabled.
    compression_threshold: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    degraded: AtomicU64,
}

impl DistributedCache {
    pub fn new(
        backend: DynKvBackend,
        codec: Arc<dyn CompressionCodec>,
        compression_threshold: usize,
    ) -> Self {
        Self {
            backend,
            codec,
            compression_threshold,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
        }
    }

    /// Reads an entry. Backend errors, decode failures, and expired entries
    /// all read as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw,
            Err(err) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "L2 read failed, treating as miss");
                return None;
            }
        };

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match self.decode(&raw) {
            Ok(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Ok(_) => {
                // Backend TTL lagged behind ours; drop the corpse.
                let _ = self.backend.delete(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "L2 entry undecodable, treating as miss");
                let _ = self.backend.delete(key).await;
                None
            }
        }
    }

    /// Writes an entry with its remaining TTL. Returns whether the backend
    /// accepted the write; `false` means the value lives in L1 only.
    pub async fn set(&self, entry: &CacheEntry, compress: bool) -> bool {
        let ttl = entry.remaining_ttl();
        if ttl.is_zero() {
            return false;
        }

        let raw = match self.encode(entry, compress) {
            Ok(raw) => raw,
            Err(err) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(key = %entry.key, error = %err, "failed to encode L2 entry, keeping local only");
                return false;
            }
        };

        match self.backend.set(&entry.key, raw, Some(ttl)).await {
            Ok(()) => {
                self.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(key = %entry.key, error = %err, "L2 write failed, keeping local only");
                false
            }
        }
    }

    /// Deletes a key, best-effort. Returns whether a live value was removed.
    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(removed) => {
                if removed {
                    self.deletes.fetch_add(1, Ordering::Relaxed);
                }
                removed
            }
            Err(err) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "L2 delete failed");
                false
            }
        }
    }

    /// Whether a live entry exists, fail-open to `false`.
    pub async fn exists(&self, key: &str) -> bool {
        self.backend.exists(key).await.unwrap_or(false)
    }

    fn encode(&self, entry: &CacheEntry, compress: bool) -> crate::error::Result<Vec<u8>> {
        let mut payload = serde_json::to_string(&entry.value)?;
        let mut use_compression = false;

        if compress && payload.len() >= self.compression_threshold {
            match self.codec.compress(payload.as_bytes()) {
                Ok(packed) => {
                    debug!(key = %entry.key, codec = self.codec.name(), "compressed L2 payload");
                    payload = BASE64.encode(packed);
                    use_compression = true;
                }
                Err(err) => {
                    warn!(key = %entry.key, error = %err, "compression failed, storing uncompressed");
                }
            }
        }

        let wire = WireEntry {
            key: entry.key.clone(),
            tags: entry.tags.clone(),
            created_at_ms: to_unix_ms(entry.created_at),
            expires_at_ms: to_unix_ms(entry.expires_at),
            compressed: use_compression,
            negative: entry.negative,
            payload,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn decode(&self, raw: &[u8]) -> std::result::Result<CacheEntry, String> {
        let wire: WireEntry =
            serde_json::from_slice(raw).map_err(|e| format!("bad envelope: {e}"))?;

        let json = if wire.compressed {
            let packed = BASE64
                .decode(&wire.payload)
                .map_err(|e| format!("bad base64 payload: {e}"))?;
            let bytes = self
                .codec
                .decompress(&packed)
                .map_err(|e| format!("decompression failed: {e}"))?;
            String::from_utf8(bytes).map_err(|e| format!("payload not UTF-8: {e}"))?
        } else {
            wire.payload
        };

        let value: Value = serde_json::from_str(&json).map_err(|e| format!("bad value: {e}"))?;

        Ok(CacheEntry {
            key: wire.key,
            value,
            tags: wire.tags,
            created_at: from_unix_ms(wire.created_at_ms),
            expires_at: from_unix_ms(wire.expires_at_ms),
            negative: wire.negative,
        })
    }

    /// Point-in-time counters for the admin surface.
    pub fn snapshot(&self) -> L2Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        L2Stats {
            backend: self.backend.backend_name().to_string(),
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("backend", &self.backend.backend_name())
            .field("codec", &self.codec.name())
            .finish()
    }
}

/// Snapshot of L2 counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct L2Stats {
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Backend/codec failures absorbed by the fail-open policy.
    pub degraded: u64,
    pub hit_ratio: f64,
}
