//! Typed cache-key builders.
//!
//! Keys are built through a validated [`KeyFamily`] per query family instead
//! of ad-hoc string templates, so two call sites cannot silently collide on
//! the same key space. A full key is `family:arg1:arg2:...`.

use crate::error::{CacheError, Result};

/// Separator between the family name and its arguments.
const KEY_SEPARATOR: char = ':';

/// A named key space for one query family (e.g. `inventory.by_warehouse`).
///
/// The family name is validated at construction; argument values are
/// validated per call. Registration-time validation is the point: a typo'd
/// family fails at startup, not as a silent cache miss in production.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyFamily {
    name: String,
}

impl KeyFamily {
    /// Creates a key family with a validated name.
    ///
    /// Names are non-empty, lowercase `[a-z0-9_.]`, and must not contain the
    /// key separator.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CacheError::invalid_key("key family name is empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
        {
            return Err(CacheError::invalid_key(format!(
                "key family name {name:?} must be lowercase [a-z0-9_.]"
            )));
        }
        Ok(Self { name })
    }

    /// The family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the full cache key for the given argument values.
    ///
    /// Arguments must be non-empty and must not contain the separator.
    pub fn key(&self, args: &[&str]) -> Result<String> {
        let mut key = self.name.clone();
        for arg in args {
            if arg.is_empty() {
                return Err(CacheError::invalid_key(format!(
                    "empty argument for key family {}",
                    self.name
                )));
            }
            if arg.contains(KEY_SEPARATOR) {
                return Err(CacheError::invalid_key(format!(
                    "argument {arg:?} for key family {} contains {KEY_SEPARATOR:?}",
                    self.name
                )));
            }
            key.push(KEY_SEPARATOR);
            key.push_str(arg);
        }
        Ok(key)
    }
}
