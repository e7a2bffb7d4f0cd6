//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
///
/// The server treats every one of these as non-fatal: the in-memory
/// document state stays authoritative for the live session and failures
/// are logged by the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend is unreachable or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation is not supported by this backend.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
