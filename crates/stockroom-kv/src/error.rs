//! Error types for key-value backend operations.

use thiserror::Error;

/// Errors that can occur while talking to a key-value backend.
///
/// The cache layer above treats every variant as a degradation signal, not a
/// caller-visible failure: a backend error on read is a miss, a backend error
/// on write leaves the entry local-only.
#[derive(Debug, Error)]
pub enum KvError {
    /// Failed to reach the backend at all.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The backend rejected or mangled a payload.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the payload problem.
        message: String,
    },

    /// The backend answered with an error of its own.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the backend-side error.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl KvError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, KvError>;
