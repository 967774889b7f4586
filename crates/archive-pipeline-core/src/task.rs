//! Units of work exchanged through the task queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{AssetId, BlobId, VersionId};

/// A schedulable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Stream a blob and persist its SHA-256
    CalculateSha256 { blob_id: BlobId },
    /// Validate one asset's publish view
    ValidateAssetMetadata { asset_id: AssetId },
    /// Validate one version's publish view
    ValidateVersionMetadata { version_id: VersionId },
    /// Hand a version to the manifest writer
    WriteManifestFiles { version_id: VersionId },
    /// Best-effort deletion of a registered DOI
    DeleteDoi { doi: String },
}

impl Task {
    /// Stable kind name, used for span fields and queue subjects
    pub fn kind(&self) -> &'static str {
        match self {
            Task::CalculateSha256 { .. } => "calculate_sha256",
            Task::ValidateAssetMetadata { .. } => "validate_asset_metadata",
            Task::ValidateVersionMetadata { .. } => "validate_version_metadata",
            Task::WriteManifestFiles { .. } => "write_manifest_files",
            Task::DeleteDoi { .. } => "delete_doi",
        }
    }

    /// Identifier of the entity the task acts on
    pub fn target(&self) -> String {
        match self {
            Task::CalculateSha256 { blob_id } => blob_id.to_string(),
            Task::ValidateAssetMetadata { asset_id } => asset_id.to_string(),
            Task::ValidateVersionMetadata { version_id }
            | Task::WriteManifestFiles { version_id } => version_id.to_string(),
            Task::DeleteDoi { doi } => doi.clone(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.target())
    }
}

/// A task plus delivery metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Delivery identifier, stable across retries
    pub id: Uuid,
    /// The work itself
    pub task: Task,
    /// 1-based attempt counter
    pub attempt: u32,
    /// When this attempt was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    /// Wrap a task for its first attempt
    pub fn new(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// Envelope for the next attempt of the same task
    pub fn retry(&self) -> Self {
        Self {
            id: self.id,
            task: self.task.clone(),
            attempt: self.attempt.saturating_add(1),
            enqueued_at: Utc::now(),
        }
    }
}
