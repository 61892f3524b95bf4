use crate::core::CoreError;
use thiserror::Error;

/// Storage layer error type for the rheo state-management runtime.
///
/// Wraps backend and serialization errors while preserving the full error
/// chain for debugging. Backends with their own failure modes (IO,
/// key-value stores) surface them through the `Backend` variant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A core serialization or deserialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O operation failed.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// A backend-specific operation failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The requested saga instance was not found in storage.
    #[error("saga instance not found: id={0}")]
    InstanceNotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
