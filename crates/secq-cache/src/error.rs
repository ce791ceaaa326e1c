//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while reading or writing a cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Headers could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp could not be parsed
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// The blocking database task failed to complete
    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A previous holder of the connection lock panicked
    #[error("Cache connection lock poisoned")]
    Poisoned,

    /// Store-specific failure
    #[error("Cache error: {0}")]
    Store(String),
}
