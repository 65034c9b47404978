//! Storage error types.
//!
//! [`StoreError`] covers the failure modes of the storage layer: absent
//! keys, unsupported capabilities, serialization, and backend I/O.

use thiserror::Error;
use xun_core::CoreError;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no entry.
    #[error("not found: {key}")]
    NotFound { key: String },

    /// The backend does not implement an optional capability. Never
    /// silently answered with an empty result.
    #[error("store does not support {operation}")]
    Unsupported { operation: &'static str },

    /// A tag query string failed to parse.
    #[error("invalid query: {message}")]
    Query { message: String },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure after retries.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite failure after retries.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Fingerprint mismatches and copy-guard violations.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    pub fn not_found(key: impl std::fmt::Display) -> StoreError {
        StoreError::NotFound {
            key: key.to_string(),
        }
    }
}
