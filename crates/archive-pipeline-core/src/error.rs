//! Error types for the archive pipeline domain

use thiserror::Error;

use crate::types::ValidationStatus;

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for domain operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Blob not found
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Asset not found
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Version not found
    #[error("Version not found: {0}")]
    VersionNotFound(String),

    /// A write-once checksum would be overwritten with a different value
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Status change not permitted by the validation state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: ValidationStatus,
        to: ValidationStatus,
    },

    /// Malformed identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage error (generic)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(err: url::ParseError) -> Self {
        PipelineError::ValidationError(format!("Invalid URL: {}", err))
    }
}
