//! Backend trait for the distributed cache tier.
//!
//! The cache layer only needs five primitives from its shared store: get,
//! set-with-TTL, delete, exists, and conditional create. Anything speaking
//! those (Redis, Memcached, a SQL table with an expiry column) can serve as
//! the L2 tier by implementing [`KeyValueBackend`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// The contract every key-value backend must implement.
///
/// Implementations must be thread-safe (`Send + Sync`). Values are opaque
/// byte payloads; serialization is the caller's concern.
///
/// # Example
///
/// ```ignore
/// use stockroom_kv::{DynKvBackend, KvError};
///
/// async fn probe(backend: &DynKvBackend) -> Result<bool, KvError> {
///     backend.exists("inventory.dashboard").await
/// }
/// ```
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `None` if the key does not exist or its TTL has elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, never for missing keys.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, overwriting any previous value.
    ///
    /// A `ttl` of `None` stores the value without expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Deletes the value stored under `key`.
    ///
    /// Returns `true` if a live value was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns whether a live value exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Stores `value` under `key` only if no live value is present.
    ///
    /// Returns `true` if the value was stored. This is the mutual-exclusion
    /// primitive the lock manager builds leases on, so implementations must
    /// make the check-and-store atomic with respect to concurrent callers.
    async fn create_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<bool>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Shared handle to a backend implementation.
pub type DynKvBackend = Arc<dyn KeyValueBackend>;
