use thiserror::Error;

/// Core error type for the rheo state-management runtime.
///
/// This error type uses `thiserror` with proper `#[source]` annotations
/// to preserve error chains for debugging and error handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Serialization failed when encoding a value to bytes.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding bytes to a value.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),

    /// A type-erased value did not hold the expected concrete type.
    #[error("type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },
}

pub type Result<T> = std::result::Result<T, CoreError>;
