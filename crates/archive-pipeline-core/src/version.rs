//! Dataset versions
//!
//! A version aggregates assets under one dandiset. The mutable working copy is
//! the `draft`; published versions carry a fixed version string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{PipelineError, Result};
use crate::types::{
    DandisetId, ValidationErrorRecord, ValidationOutcome, ValidationRun, ValidationStatus, VersionId,
};

/// Draft/published discriminator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "version", rename_all = "snake_case")]
pub enum VersionTag {
    /// Mutable working copy
    Draft,
    /// Immutable published release (e.g. `0.230101.1200`)
    Published(String),
}

impl VersionTag {
    /// Whether this is the draft version
    pub fn is_draft(&self) -> bool {
        matches!(self, VersionTag::Draft)
    }

    /// String form stored in the database
    pub fn as_str(&self) -> &str {
        match self {
            VersionTag::Draft => "draft",
            VersionTag::Published(v) => v.as_str(),
        }
    }

    /// Parse the stored form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" => Err(PipelineError::ValidationError(
                "Version tag cannot be empty".to_string(),
            )),
            "draft" => Ok(VersionTag::Draft),
            other => Ok(VersionTag::Published(other.to_string())),
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Totals over the assets of a version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetsSummary {
    /// Number of assets
    pub number_of_files: u64,
    /// Sum of blob sizes in bytes
    pub number_of_bytes: u64,
}

/// A dataset version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// Unique identifier
    pub id: VersionId,

    /// Owning dandiset
    pub dandiset_id: DandisetId,

    /// Draft or published
    pub version: VersionTag,

    /// Dataset title
    pub name: String,

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

impl Version {
    /// Create the draft version of a dandiset
    pub fn draft(dandiset_id: DandisetId, name: impl Into<String>, metadata: Value) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PipelineError::ValidationError(
                "Version name cannot be empty".to_string(),
            ));
        }
        if !metadata.is_object() {
            return Err(PipelineError::ValidationError(
                "Version metadata must be a JSON object".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: VersionId::new(),
            dandiset_id,
            version: VersionTag::Draft,
            name,
            metadata,
            status: ValidationStatus::Pending,
            validation_errors: Vec::new(),
            validation_run: ValidationRun::default(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Override the generated identifier
    pub fn with_id(mut self, id: VersionId) -> Self {
        self.id = id;
        self
    }

    /// Enter `VALIDATING`
    ///
    /// Returns the generation of the new run.
    pub fn begin_validation(&mut self) -> Result<ValidationRun> {
        self.status = self.status.transition(ValidationStatus::Validating)?;
        self.validation_run = self.validation_run.next();
        self.updated_at = Utc::now();
        Ok(self.validation_run)
    }

    /// Record the terminal outcome of a validation run
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
