//! Storage backend abstractions and blob location handling
//!
//! Blob bytes live outside the pipeline. A [`StorageLocation`] is the locator
//! the upload subsystem recorded for a blob; the pipeline only ever reads
//! through it.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{PipelineError, Result};

/// Supported storage backend types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageBackend {
    /// Object store reachable over HTTP(S), e.g. an S3 or MinIO bucket endpoint
    Http {
        /// Base URL the object key is appended to
        base_url: String,
    },

    /// Local filesystem storage
    FileSystem {
        /// Base directory path
        base_path: String,
    },
}

impl StorageBackend {
    /// Validate the storage backend configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            StorageBackend::Http { base_url } => {
                if base_url.is_empty() {
                    return Err(PipelineError::ValidationError(
                        "HTTP base URL cannot be empty".to_string(),
                    ));
                }
                let parsed = Url::parse(base_url).map_err(|e| {
                    PipelineError::ValidationError(format!("Invalid HTTP base URL: {}", e))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(PipelineError::ValidationError(format!(
                        "Unsupported URL scheme for blob storage: {}",
                        parsed.scheme()
                    )));
                }
                Ok(())
            }
            StorageBackend::FileSystem { base_path } => {
                if base_path.is_empty() {
                    return Err(PipelineError::ValidationError(
                        "FileSystem base path cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get a human-readable name for the storage backend type
    pub fn backend_type(&self) -> &str {
        match self {
            StorageBackend::Http { .. } => "Http",
            StorageBackend::FileSystem { .. } => "FileSystem",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.backend_type())
    }
}

/// Where a blob's bytes are stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    /// The storage backend configuration
    pub backend: StorageBackend,
    /// The object key / relative path within the backend
    pub path: String,
}

impl StorageLocation {
    /// Create a new storage location with validation
    ///
    /// # Errors
    /// Returns an error if the backend or path is invalid
    pub fn new(backend: StorageBackend, path: impl Into<String>) -> Result<Self> {
        backend.validate()?;

        let path = path.into();
        if path.is_empty() {
            return Err(PipelineError::ValidationError(
                "Storage path cannot be empty".to_string(),
            ));
        }

        Ok(Self { backend, path })
    }

    /// Convenience constructor for filesystem storage
    pub fn file_system(base_path: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Self::new(
            StorageBackend::FileSystem {
                base_path: base_path.into(),
            },
            path,
        )
    }

    /// Convenience constructor for HTTP object storage
    pub fn http(base_url: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Self::new(
            StorageBackend::Http {
                base_url: base_url.into(),
            },
            path,
        )
    }

    /// Resolve the full URL of an HTTP-backed object
    pub fn http_url(&self) -> Result<Url> {
        match &self.backend {
            StorageBackend::Http { base_url } => {
                let base = if base_url.ends_with('/') {
                    Url::parse(base_url)?
                } else {
                    Url::parse(&format!("{}/", base_url))?
                };
                Ok(base.join(self.path.trim_start_matches('/'))?)
            }
            other => Err(PipelineError::StorageError(format!(
                "{} location has no HTTP URL",
                other
            ))),
        }
    }

    /// URI representation used in logs
    pub fn uri(&self) -> String {
        match &self.backend {
            StorageBackend::Http { base_url } => format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            ),
            StorageBackend::FileSystem { base_path } => format!(
                "file://{}/{}",
                base_path.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            ),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}
