//! StorageError - Persistence Failure Kinds
//!
//! TigerStyle: one error type per subsystem, explicit kinds, no silent
//! recovery. Every failed operation leaves in-memory state untouched.

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by entities and storage engines.
///
/// Each variant is a distinct failure kind; callers match on the variant,
/// never on the message.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid attribute key or construction argument.
    #[error("invalid type: {0}")]
    Type(String),

    /// Durable read or write failed (permissions, disk full, connection refused).
    #[error("i/o failure: {0}")]
    Io(String),

    /// Persisted content is malformed (corrupt JSON, unknown discriminator,
    /// relational shape mismatch).
    #[error("malformed content: {0}")]
    Format(String),

    /// Relational constraint violation on commit.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Missing or invalid engine configuration at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Invalid type error.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// I/O failure.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Malformed content.
    #[must_use]
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Constraint violation.
    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    /// Invalid configuration.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(err.to_string())
    }
}
