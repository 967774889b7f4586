//! Service-layer error types
//!
//! Only infrastructure failures are errors here. A document that fails
//! validation is a normal outcome and never surfaces as a [`ServiceError`].

use archive_pipeline_core::PipelineError;
use archive_pipeline_db::DbError;
use thiserror::Error;

/// Result type alias for service operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Service-layer error types
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Blob storage could not be read
    #[error("Storage error: {0}")]
    Storage(String),

    /// The bytes read do not match the size declared at upload
    #[error("Blob size mismatch: declared {declared} bytes, read {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    /// A different checksum is already persisted for the blob
    #[error("Checksum conflict: stored {expected}, computed {actual}")]
    ChecksumConflict { expected: String, actual: String },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Queue or event transport error
    #[error("Messaging error: {0}")]
    Messaging(String),

    /// Remote service (e.g. DataCite) failed
    #[error("Remote service error: {0}")]
    Remote(String),

    /// A bundled or configured schema could not be loaded
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal service error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether retrying the same task later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Storage(_)
                | ServiceError::SizeMismatch { .. }
                | ServiceError::Database(_)
                | ServiceError::Messaging(_)
                | ServiceError::Remote(_)
        )
    }
}

impl From<PipelineError> for ServiceError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::BlobNotFound(msg)
            | PipelineError::AssetNotFound(msg)
            | PipelineError::VersionNotFound(msg) => ServiceError::NotFound(msg),
            PipelineError::ChecksumMismatch { expected, actual } => {
                ServiceError::ChecksumConflict { expected, actual }
            }
            PipelineError::StorageError(msg) => ServiceError::Storage(msg),
            PipelineError::ValidationError(msg) | PipelineError::InvalidIdentifier(msg) => {
                ServiceError::InvalidInput(msg)
            }
            PipelineError::ConfigurationError(msg) => ServiceError::Configuration(msg),
            _ => ServiceError::Internal(err.to_string()),
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ServiceError::NotFound(msg),
            DbError::Connection(msg)
            | DbError::Pool(msg)
            | DbError::Query(msg)
            | DbError::Transaction(msg) => ServiceError::Database(msg),
            DbError::Messaging(msg) => ServiceError::Messaging(msg),
            DbError::ConstraintViolation(msg)
            | DbError::ForeignKeyViolation(msg)
            | DbError::UniqueViolation(msg)
            | DbError::InvalidData(msg) => ServiceError::InvalidInput(msg),
            DbError::Configuration(msg) => ServiceError::Configuration(msg),
            DbError::Domain(err) => ServiceError::from(err),
            DbError::Migration(msg)
            | DbError::Serialization(msg)
            | DbError::Internal(msg)
            | DbError::Other(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("Serialization error: {}", err))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Remote(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_from_pipeline_error() {
        let err: ServiceError = PipelineError::BlobNotFound("b1".to_string()).into();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(!err.is_retryable());

        let err: ServiceError = PipelineError::ChecksumMismatch {
            expected: "a".to_string(),
            actual: "b".to_string(),
        }
        .into();
        assert!(matches!(err, ServiceError::ChecksumConflict { .. }));
    }

    #[test]
    fn test_service_error_from_db_error() {
        let err: ServiceError = DbError::Pool("timeout".to_string()).into();
        assert!(matches!(err, ServiceError::Database(_)));
        assert!(err.is_retryable());

        let err: ServiceError = DbError::NotFound("asset".to_string()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ServiceError::Storage("down".to_string()).is_retryable());
        assert!(ServiceError::SizeMismatch {
            declared: 20,
            actual: 10
        }
        .is_retryable());
        assert!(!ServiceError::Schema("bad".to_string()).is_retryable());
        assert!(!ServiceError::InvalidInput("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::SizeMismatch {
            declared: 20,
            actual: 19,
        };
        assert_eq!(err.to_string(), "Blob size mismatch: declared 20 bytes, read 19");
    }
}
