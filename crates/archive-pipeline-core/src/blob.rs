//! Uploaded blob records
//!
//! A blob is an immutable content reference created by the upload subsystem.
//! The pipeline reads it, computes its checksum once, and never changes it
//! otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::{PipelineError, Result};
use crate::storage::StorageLocation;
use crate::types::BlobId;

/// Immutable content reference with a write-once checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// Unique identifier
    pub id: BlobId,

    /// Where the bytes live
    pub location: StorageLocation,

    /// Size declared at upload time, in bytes
    pub size: u64,

    /// Transport integrity tag reported by the object store
    pub etag: String,

    /// Content checksum, `None` until the pipeline computes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Checksum>,

    /// Upload timestamp
    pub created_at: DateTime<Utc>,
}

impl Blob {
    /// Create a blob record without a checksum
    pub fn new(location: StorageLocation, size: u64, etag: impl Into<String>) -> Result<Self> {
        let etag = etag.into();
        if etag.is_empty() {
            return Err(PipelineError::ValidationError(
                "Blob etag cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: BlobId::new(),
            location,
            size,
            etag,
            sha256: None,
            created_at: Utc::now(),
        })
    }

    /// Override the generated identifier
    pub fn with_id(mut self, id: BlobId) -> Self {
        self.id = id;
        self
    }

    /// Whether the checksum has been computed
    pub fn has_checksum(&self) -> bool {
        self.sha256.is_some()
    }

    /// Apply the write-once rule to the in-memory record.
    ///
    /// Returns `Ok(true)` when the checksum was newly set, `Ok(false)` when the
    /// same value was already present.
    ///
    /// # Errors
    /// Returns [`PipelineError::ChecksumMismatch`] when a different checksum is
    /// already stored.
    pub fn set_checksum_once(&mut self, checksum: Checksum) -> Result<bool> {
        match &self.sha256 {
            None => {
                self.sha256 = Some(checksum);
                Ok(true)
            }
            Some(existing) if existing.verify(&checksum) => Ok(false),
            Some(existing) => Err(PipelineError::ChecksumMismatch {
                expected: existing.value().to_string(),
                actual: checksum.value().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> Blob {
        let location = StorageLocation::file_system("/data", "blobs/abc").unwrap();
        Blob::new(location, 20, "76d36e98f312e98ff908c8c82c8dd623-0").unwrap()
    }

    #[test]
    fn test_new_blob_has_no_checksum() {
        let blob = blob();
        assert!(!blob.has_checksum());
        assert_eq!(blob.size, 20);
    }

    #[test]
    fn test_empty_etag_rejected() {
        let location = StorageLocation::file_system("/data", "blobs/abc").unwrap();
        assert!(Blob::new(location, 1, "").is_err());
    }

    #[test]
    fn test_checksum_write_once() {
        let mut blob = blob();
        let first = Checksum::sha256("a".repeat(64)).unwrap();

        assert!(blob.set_checksum_once(first.clone()).unwrap());
        assert!(!blob.set_checksum_once(first.clone()).unwrap());

        let other = Checksum::sha256("b".repeat(64)).unwrap();
        let err = blob.set_checksum_once(other).unwrap_err();
        assert!(matches!(err, PipelineError::ChecksumMismatch { .. }));
        assert_eq!(blob.sha256, Some(first));
    }
}
