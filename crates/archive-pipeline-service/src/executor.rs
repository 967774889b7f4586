//! Task execution
//!
//! Routes each [`Task`] variant to the component that handles it. Errors are
//! returned unchanged so the worker pool can decide whether to retry.
//!
//! `CalculateSha256` covers both the checksum and its fan-out: the task only
//! succeeds once every dependent asset has a validation task queued.

use archive_pipeline_core::{Task, VersionId};
use archive_pipeline_db::VersionRepository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::asset_validation::AssetValidator;
use crate::checksum::ChecksumComputer;
use crate::dispatch::TaskDispatcher;
use crate::doi::DoiClient;
use crate::error::{ServiceError, ServiceResult};
use crate::manifest::ManifestWriter;
use crate::version_validation::VersionValidator;

/// Handles one task delivery
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute `task` to completion
    ///
    /// # Errors
    /// Infrastructure failures only; see [`ServiceError::is_retryable`]
    async fn handle(&self, task: &Task) -> ServiceResult<()>;
}

/// The pipeline's [`TaskHandler`]
pub struct TaskExecutor {
    checksums: Arc<ChecksumComputer>,
    dispatcher: TaskDispatcher,
    assets: Arc<AssetValidator>,
    versions: Arc<VersionValidator>,
    version_repo: Arc<dyn VersionRepository>,
    manifests: Option<Arc<dyn ManifestWriter>>,
    doi: Arc<dyn DoiClient>,
}

impl TaskExecutor {
    pub fn new(
        checksums: Arc<ChecksumComputer>,
        dispatcher: TaskDispatcher,
        assets: Arc<AssetValidator>,
        versions: Arc<VersionValidator>,
        version_repo: Arc<dyn VersionRepository>,
        doi: Arc<dyn DoiClient>,
    ) -> Self {
        Self {
            checksums,
            dispatcher,
            assets,
            versions,
            version_repo,
            manifests: None,
            doi,
        }
    }

    /// Route `WriteManifestFiles` tasks to `writer`
    pub fn with_manifest_writer(mut self, writer: Arc<dyn ManifestWriter>) -> Self {
        self.manifests = Some(writer);
        self
    }

    async fn write_manifests(&self, version_id: &VersionId) -> ServiceResult<()> {
        let Some(writer) = &self.manifests else {
            warn!(version_id = %version_id, "No manifest writer configured, skipping");
            return Ok(());
        };

        let version = self
            .version_repo
            .find_by_id(version_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("version {}", version_id)))?;
        writer.write(&version).await
    }

    async fn delete_doi(&self, doi: &str) {
        if let Err(e) = self.doi.delete(doi).await {
            warn!(doi, error = %e, "DOI deletion failed");
        }
    }
}

#[async_trait]
impl TaskHandler for TaskExecutor {
    async fn handle(&self, task: &Task) -> ServiceResult<()> {
        debug!(task = %task, "Executing task");
        match task {
            Task::CalculateSha256 { blob_id } => {
                let report = self.checksums.compute(blob_id).await?;
                self.dispatcher.handle_event(&report.ready_event()).await?;
            }
            Task::ValidateAssetMetadata { asset_id } => {
                self.assets.validate(asset_id).await?;
            }
            Task::ValidateVersionMetadata { version_id } => {
                self.versions.validate(version_id).await?;
            }
            Task::WriteManifestFiles { version_id } => {
                self.write_manifests(version_id).await?;
            }
            Task::DeleteDoi { doi } => {
                self.delete_doi(doi).await;
            }
        }
        Ok(())
    }
}
