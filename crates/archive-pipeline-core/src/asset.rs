//! Asset records
//!
//! An asset is a named metadata record bound to exactly one blob. Its metadata
//! is a schema-versioned JSON object kept as-is; validators only ever look at
//! the rendered publish view of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::types::{
    AssetId, BlobId, ValidationErrorRecord, ValidationOutcome, ValidationRun, ValidationStatus,
};

/// Metadata record bound to one blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Unique identifier
    pub id: AssetId,

    /// Path of the asset inside its dataset (e.g. `sub-01/sub-01_ecephys.nwb`)
    pub path: String,

    /// Blob holding the content
    pub blob_id: BlobId,

    /// Stored metadata document
    pub metadata: Value,

    /// Validation status
    pub status: ValidationStatus,

    /// Errors from the last completed validation run
    #[serde(default)]
    pub validation_errors: Vec<ValidationErrorRecord>,

    /// Generation of the latest validation run
    #[serde(default)]
    pub validation_run: ValidationRun,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// Create a new asset in `PENDING` state
    ///
    /// # Errors
    /// Returns an error if the path is empty or the metadata is not a JSON object
    pub fn new(path: impl Into<String>, blob_id: BlobId, metadata: Value) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(PipelineError::ValidationError(
                "Asset path cannot be empty".to_string(),
            ));
        }
        if path.starts_with('/') {
            return Err(PipelineError::ValidationError(format!(
                "Asset path must be relative: {}",
                path
            )));
        }
        if !metadata.is_object() {
            return Err(PipelineError::ValidationError(
                "Asset metadata must be a JSON object".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: AssetId::new(),
            path,
            blob_id,
            metadata,
            status: ValidationStatus::Pending,
            validation_errors: Vec::new(),
            validation_run: ValidationRun::default(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Override the generated identifier
    pub fn with_id(mut self, id: AssetId) -> Self {
        self.id = id;
        self
    }

    /// Enter `VALIDATING`. Allowed from every state.
    ///
    /// Returns the generation of the new run.
    pub fn begin_validation(&mut self) -> Result<ValidationRun> {
        self.status = self.status.transition(ValidationStatus::Validating)?;
        self.validation_run = self.validation_run.next();
        self.updated_at = Utc::now();
        Ok(self.validation_run)
    }

    /// Record the terminal outcome of a validation run, replacing old errors
    ///
    /// Returns `false` without touching the record when `run` has been
    /// superseded by a later run.
    pub fn complete_validation(
        &mut self,
        run: ValidationRun,
        outcome: ValidationOutcome,
    ) -> Result<bool> {
        if run != self.validation_run {
            return Ok(false);
        }
        let (status, errors) = outcome.into_parts();
        self.status = self.status.transition(status)?;
        self.validation_errors = errors;
        self.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset() -> Asset {
        Asset::new("foo/bar.txt", BlobId::new(), json!({"schemaKey": "Asset"})).unwrap()
    }

    #[test]
    fn test_new_asset_is_pending() {
        let asset = asset();
        assert_eq!(asset.status, ValidationStatus::Pending);
        assert!(asset.validation_errors.is_empty());
    }

    #[test]
    fn test_asset_rejects_bad_input() {
        assert!(Asset::new("", BlobId::new(), json!({})).is_err());
        assert!(Asset::new("/abs", BlobId::new(), json!({})).is_err());
        assert!(Asset::new("a.txt", BlobId::new(), json!([1, 2])).is_err());
    }

    #[test]
    fn test_validation_cycle() {
        let mut asset = asset();
        let run = asset.begin_validation().unwrap();
        assert_eq!(asset.status, ValidationStatus::Validating);

        let errors = vec![ValidationErrorRecord::new("description", "required")];
        assert!(asset
            .complete_validation(run, ValidationOutcome::Invalid(errors.clone()))
            .unwrap());
        assert_eq!(asset.status, ValidationStatus::Invalid);
        assert_eq!(asset.validation_errors, errors);

        let run = asset.begin_validation().unwrap();
        assert!(asset.complete_validation(run, ValidationOutcome::Valid).unwrap());
        assert_eq!(asset.status, ValidationStatus::Valid);
        assert!(asset.validation_errors.is_empty());
    }

    #[test]
    fn test_superseded_run_is_dropped() {
        let mut asset = asset();
        let stale = asset.begin_validation().unwrap();
        let current = asset.begin_validation().unwrap();

        assert!(asset.complete_validation(current, ValidationOutcome::Valid).unwrap());
        let errors = vec![ValidationErrorRecord::new("digest", "missing")];
        assert!(!asset
            .complete_validation(stale, ValidationOutcome::Invalid(errors))
            .unwrap());

        assert_eq!(asset.status, ValidationStatus::Valid);
        assert!(asset.validation_errors.is_empty());
    }

    #[test]
    fn test_complete_without_begin_fails() {
        let mut asset = asset();
        let run = asset.validation_run;
        assert!(asset.complete_validation(run, ValidationOutcome::Valid).is_err());
        assert_eq!(asset.status, ValidationStatus::Pending);
    }
}
