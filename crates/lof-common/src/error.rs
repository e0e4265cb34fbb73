//! Error types for the LOF table storage engine.

use thiserror::Error;

/// Result type alias using LofError.
pub type Result<T> = std::result::Result<T, LofError>;

/// Errors that can occur in page store, cache, index and table operations.
#[derive(Debug, Error)]
pub enum LofError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: u32, reason: String },

    // Configuration errors
    #[error("Cache configuration error: {0}")]
    CacheConfig(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Index errors
    #[error("Duplicate key: {key}")]
    DuplicateKey { key: i64 },

    #[error("Key {key} does not fit in {key_size} bytes")]
    KeyOutOfRange { key: i64, key_size: usize },

    #[error("Value size mismatch: expected {expected}, got {actual}")]
    ValueSizeMismatch { expected: usize, actual: usize },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
