//! Error types for the image cache.

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache error taxonomy.
///
/// Every variant carries owned strings so one failure can be handed to all
/// callers waiting on the same pending generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Embedding provider unavailable (timeout, quota, service error)
    #[error("Embedding provider error: {0}")]
    Provider(String),

    /// Image synthesis failed
    #[error("Image generation failed: {0}")]
    Generation(String),

    /// Embedding length differs from the index dimensionality
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding contains non-finite values
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// Persisted index snapshot failed verification
    #[error("Index snapshot corrupted: {0}")]
    IndexCorruption(String),

    /// Metadata store or database failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// File store failure
    #[error("File store error: {0}")]
    FileStore(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entry not found
    #[error("Entry not found: {0}")]
    NotFound(String),
}

impl CacheError {
    /// Whether the cache may fail open (behave as if nothing were cached).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::Provider(_) | CacheError::IndexCorruption(_)
        )
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CacheError>() {
            Ok(cache_err) => cache_err,
            Err(other) => CacheError::Storage(format!("{other:#}")),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::FileStore(err.to_string())
    }
}
