//! Error types for storage backends.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage backends.
///
/// These never leave [`crate::IdentityStore`]; they exist so backends can
/// report why a read or write was skipped.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be used at all (disabled, private mode, no path).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Filesystem failure.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be parsed.
    #[error("corrupted store: {0}")]
    Corrupted(String),

    /// Keys must be non-empty and free of path separators.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// An internal lock was poisoned by a panicking writer.
    #[error("storage lock error: {0}")]
    Lock(String),
}
