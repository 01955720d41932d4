//! In-memory key-value backend.
//!
//! Backs the cache's L2 tier in tests and single-node deployments. Expiry is
//! checked lazily on read, so a dead entry occupies memory until the next
//! access touches it.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::Result;
use crate::traits::KeyValueBackend;

#[derive(Debug, Clone)]
struct Stored {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Stored {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory backend over a concurrent map with lazy per-key expiry.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: DashMap<String, Stored>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of entries currently held, including not-yet-collected expired ones.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns whether the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.data.insert(key.to_string(), Stored::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.data.remove(key) {
            Some((_, stored)) => Ok(!stored.is_expired()),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        // The entry API holds the shard lock across the check and the write,
        // which is what makes this usable as a lock primitive.
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Stored::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Stored::new(value, ttl));
                Ok(true)
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryBackend::new();

        backend.set("k1", b"v1".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), Some(b"v1".to_vec()));
        assert!(backend.exists("k1").await.unwrap());

        assert!(backend.delete("k1").await.unwrap());
        assert_eq!(backend.get("k1").await.unwrap(), None);
        assert!(!backend.delete("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let backend = MemoryBackend::new();

        backend
            .set("short", b"v".to_vec(), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(backend.exists("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(backend.get("short").await.unwrap(), None);
        assert!(!backend.exists("short").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_if_absent() {
        let backend = MemoryBackend::new();

        assert!(
            backend
                .create_if_absent("lock:a", b"t1".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            !backend
                .create_if_absent("lock:a", b"t2".to_vec(), None)
                .await
                .unwrap()
        );
        // First holder's value survives the failed attempt
        assert_eq!(backend.get("lock:a").await.unwrap(), Some(b"t1".to_vec()));
    }

    #[tokio::test]
    async fn test_create_if_absent_after_expiry() {
        let backend = MemoryBackend::new();

        assert!(
            backend
                .create_if_absent("lock:b", b"t1".to_vec(), Some(Duration::from_millis(30)))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(
            backend
                .create_if_absent("lock:b", b"t2".to_vec(), None)
                .await
                .unwrap()
        );
        assert_eq!(backend.get("lock:b").await.unwrap(), Some(b"t2".to_vec()));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let backend = MemoryBackend::new();

        backend.set("k", b"old".to_vec(), None).await.unwrap();
        backend.set("k", b"new".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"new".to_vec()));
    }
}
