//! Distributed per-key leases.
//!
//! Built on the backend's conditional create: a lock is a key holding the
//! holder's token with a TTL equal to the lease. A crashed holder is bounded
//! by the lease, and release only succeeds for the token that acquired it, so
//! a holder whose lease already lapsed cannot free somebody else's lock.

use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use stockroom_kv::DynKvBackend;

/// Prefix separating lock keys from cache keys in the shared backend.
const LOCK_PREFIX: &str = "lock:";

/// Proof of lock ownership, returned by [`LockManager::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    resource: String,
    token: Uuid,
}

impl LockToken {
    /// The resource this token guards.
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// Per-key mutual exclusion over the shared backend.
#[derive(Clone)]
pub struct LockManager {
    backend: DynKvBackend,
}

impl LockManager {
    pub fn new(backend: DynKvBackend) -> Self {
        Self { backend }
    }

    fn lock_key(resource: &str) -> String {
        format!("{LOCK_PREFIX}{resource}")
    }

    /// Tries to take the lease for `resource`.
    ///
    /// Returns `None` when another holder's lease is still live, and also on
    /// backend failure — the caller's fallback path (duplicate load) is safe,
    /// deadlocking on a dead backend is not.
    pub async fn acquire(&self, resource: &str, lease: Duration) -> Option<LockToken> {
        let token = Uuid::new_v4();
        let created = self
            .backend
            .create_if_absent(
                &Self::lock_key(resource),
                token.as_bytes().to_vec(),
                Some(lease),
            )
            .await;

        match created {
            Ok(true) => {
                debug!(resource = %resource, "acquired lock");
                Some(LockToken {
                    resource: resource.to_string(),
                    token,
                })
            }
            Ok(false) => None,
            Err(err) => {
                warn!(resource = %resource, error = %err, "lock acquire failed, proceeding unlocked");
                None
            }
        }
    }

    /// Releases the lease if `token` still holds it.
    ///
    /// Returns `false` when the lease already expired and was reclaimed, or
    /// when the backend is unreachable; the lease TTL cleans up either way.
    pub async fn release(&self, token: &LockToken) -> bool {
        let key = Self::lock_key(&token.resource);
        match self.backend.get(&key).await {
            Ok(Some(held)) if held == token.token.as_bytes() => {
                self.backend.delete(&key).await.unwrap_or(false)
            }
            Ok(_) => false,
            Err(err) => {
                warn!(resource = %token.resource, error = %err, "lock release failed, lease will expire");
                false
            }
        }
    }

    /// Extends the lease for the current holder.
    pub async fn extend(&self, token: &LockToken, lease: Duration) -> bool {
        let key = Self::lock_key(&token.resource);
        match self.backend.get(&key).await {
            Ok(Some(held)) if held == token.token.as_bytes() => self
                .backend
                .set(&key, token.token.as_bytes().to_vec(), Some(lease))
                .await
                .is_ok(),
            _ => false,
        }
    }

    /// Whether any holder currently has the resource.
    pub async fn is_held(&self, resource: &str) -> bool {
        self.backend
            .exists(&Self::lock_key(resource))
            .await
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}
