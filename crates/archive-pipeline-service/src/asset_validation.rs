//! Asset metadata validation
//!
//! `PENDING|VALID|INVALID → VALIDATING → {VALID, INVALID}`. Every run re-enters
//! `VALIDATING` first and only then reads the asset and its blob, so a run
//! started after a checksum write always sees that checksum. The terminal
//! write is fenced by the run generation: when overlapping runs race, only
//! the latest one records its outcome.

use archive_pipeline_core::{AssetId, EventType, PipelineEvent, ValidationOutcome};
use archive_pipeline_db::{AssetRepository, BlobRepository, EventPublisher};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::normalize::outcome_from_result;
use crate::render::PublishRenderer;
use crate::schema::{MetadataValidator, SchemaKey};

/// Validates an asset's publish view and records the outcome
pub struct AssetValidator {
    assets: Arc<dyn AssetRepository>,
    blobs: Arc<dyn BlobRepository>,
    renderer: Arc<dyn PublishRenderer>,
    validator: Arc<dyn MetadataValidator>,
    events: Arc<dyn EventPublisher>,
}

impl AssetValidator {
    /// Create a new asset validator
    pub fn new(
        assets: Arc<dyn AssetRepository>,
        blobs: Arc<dyn BlobRepository>,
        renderer: Arc<dyn PublishRenderer>,
        validator: Arc<dyn MetadataValidator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            assets,
            blobs,
            renderer,
            validator,
            events,
        }
    }

    /// Run one validation pass over an asset
    ///
    /// A failed validation is a normal outcome: it is persisted as `INVALID`
    /// with its error records and returned as `Ok`. If a later run entered
    /// `VALIDATING` meanwhile, this run's outcome is returned but not recorded.
    ///
    /// # Errors
    /// * `NotFound` if the asset or its blob does not exist
    /// * `Database` if a read or write fails; the asset stays `VALIDATING`
    ///   until a retry or the stale sweep runs it again
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn validate(&self, asset_id: &AssetId) -> ServiceResult<ValidationOutcome> {
        let run = self.assets.mark_validating(asset_id).await?;

        let asset = self
            .assets
            .find_by_id(asset_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("asset {}", asset_id)))?;

        let blob = self
            .blobs
            .find_by_id(&asset.blob_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("blob {}", asset.blob_id)))?;
        debug!(run = %run, has_checksum = blob.has_checksum(), "Asset marked validating");

        let document = self.renderer.render_asset(&asset, &blob, Utc::now());
        let outcome = outcome_from_result(self.validator.validate(&document, SchemaKey::PublishedAsset));

        if !self.assets.record_validation(asset_id, run, &outcome).await? {
            info!(run = %run, "Asset validation superseded by a later run");
            return Ok(outcome);
        }

        info!(
            status = %outcome.status(),
            errors = outcome.errors().len(),
            "Asset validation recorded"
        );

        let event = PipelineEvent::new(EventType::AssetValidated {
            asset_id: *asset_id,
            status: outcome.status(),
            error_count: outcome.errors().len(),
        });
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish asset validation event");
        }

        Ok(outcome)
    }
}
