//! Error types for the consultation data core.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for consultcore operations
pub type ConsultResult<T> = Result<T, ConsultError>;

/// Main error type for consultcore operations
#[derive(Error, Debug)]
pub enum ConsultError {
    /// The platform denied persistent storage. Fatal; surfaced once at
    /// startup. Callers may fall back to `LocalStore::open_in_memory`.
    #[error("Persistent storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Sync error: {0}")]
    Sync(String),

    /// Transient network failure; the affected entry is retried on the
    /// next drain.
    #[error("Network error: {0}")]
    Network(String),

    /// The server rejected the mutation itself. Retried up to the bounded
    /// cap, then abandoned.
    #[error("Server rejected mutation: {0}")]
    ServerRejected(String),

    /// A pending entry referenced a local ID that was never remapped.
    /// Indicates a logic bug; must not occur if remap-before-submit holds.
    #[error("Remap inconsistency: {0}")]
    RemapInconsistency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl ConsultError {
    /// Create a new sync error
    pub fn sync(message: impl Into<String>) -> Self {
        ConsultError::Sync(message.into())
    }

    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        ConsultError::Network(message.into())
    }

    /// Create a new remap inconsistency error
    pub fn remap(message: impl Into<String>) -> Self {
        ConsultError::RemapInconsistency(message.into())
    }

    /// Whether a retry on a later drain can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConsultError::Network(_))
    }
}
