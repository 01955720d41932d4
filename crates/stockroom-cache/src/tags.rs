//! Reverse tag index driving bulk invalidation.
//!
//! Written alongside every cache write: each key records its tags and each
//! tag records its keys. Registrations are idempotent and commutative, so
//! concurrent writers for different keys never conflict. A tag invalidation
//! removes the keys registered *at that instant*; a write racing the
//! invalidation under the same tag keeps its entry (accepted relaxation).

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::debug;

use crate::distributed::DistributedCache;
use crate::local::LocalCache;

/// Bidirectional tag ↔ key index.
///
/// Both directions are needed: tag → keys for invalidation, key → tags for a
/// clean delete path that leaves no orphans behind. Orphans that survive a
/// crash are swept by [`TagIndex::forget`] the next time the key misses.
#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_keys: DashMap<String, HashSet<String>>,
    key_to_tags: DashMap<String, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` under each tag. Re-registering is a no-op.
    ///
    /// A key with no tags is still recorded, so [`TagIndex::all_keys`] covers
    /// the full written key set and untagged entries do not escape bulk
    /// deletion.
    pub fn register(&self, key: &str, tags: &[String]) {
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.key_to_tags
            .entry(key.to_string())
            .or_default()
            .extend(tags.iter().cloned());
    }

    /// Keys currently registered under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tag_to_keys
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tags the key is registered under.
    pub fn tags_for_key(&self, key: &str) -> Vec<String> {
        self.key_to_tags
            .get(key)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops every registration for `key`, both directions.
    pub fn forget(&self, key: &str) {
        if let Some((_, tags)) = self.key_to_tags.remove(key) {
            for tag in tags {
                if let Some(mut keys) = self.tag_to_keys.get_mut(&tag) {
                    keys.remove(key);
                }
            }
        }
    }

    /// Removes every key registered under `tag` from both cache tiers.
    ///
    /// Best-effort: a failure removing one key does not abort the rest.
    /// Returns the number of keys actually removed from at least one tier.
    pub async fn invalidate_tag(
        &self,
        tag: &str,
        l1: &LocalCache,
        l2: &DistributedCache,
    ) -> usize {
        let keys = match self.tag_to_keys.remove(tag) {
            Some((_, keys)) => keys,
            None => return 0,
        };

        let mut removed = 0;
        for key in &keys {
            let in_l1 = l1.remove(key).await;
            let in_l2 = l2.delete(key).await;
            if in_l1 || in_l2 {
                removed += 1;
            }
            // Clean the reverse direction regardless of tier outcomes
            if let Some(mut tags) = self.key_to_tags.get_mut(key) {
                tags.remove(tag);
            }
        }

        debug!(tag = %tag, keys = keys.len(), removed, "invalidated tag");
        removed
    }

    /// Every key known to the index.
    pub fn all_keys(&self) -> Vec<String> {
        self.key_to_tags
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of distinct tags.
    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    /// Drops all registrations.
    pub fn clear(&self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }
}
