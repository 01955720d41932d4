//! Error types for the cache engine.
//!
//! The taxonomy is deliberately small. Backend trouble never becomes a
//! caller-visible error (the distributed tier degrades to a miss or a
//! local-only write), and a lost lock race is handled by the direct-load
//! fallback. What remains is loader failures, which pass through to the
//! caller, and configuration problems, which are rejected eagerly.

use thiserror::Error;

/// Boxed error type carried through loader closures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The caller-supplied loader failed. The original error is preserved as
    /// the source and is never cached.
    #[error("Loader failed for key {key}: {source}")]
    Loader {
        /// Cache key the loader was computing.
        key: String,
        /// The loader's own error, unchanged.
        #[source]
        source: BoxError,
    },

    /// A configuration value or policy patch was rejected.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description of the rejected input.
        message: String,
    },

    /// A cache key or key-family name failed validation.
    #[error("Invalid cache key: {message}")]
    InvalidKey {
        /// Description of the validation failure.
        message: String,
    },

    /// JSON (de)serialization of a cached value failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Creates a new `Loader` error wrapping the caller's error.
    #[must_use]
    pub fn loader(key: impl Into<String>, source: BoxError) -> Self {
        Self::Loader {
            key: key.into(),
            source,
        }
    }

    /// Creates a new `InvalidConfiguration` error.
    #[must_use]
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
