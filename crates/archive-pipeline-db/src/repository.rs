//! Repository trait abstractions for pipeline persistence
//!
//! The pipeline touches three entity kinds: blobs (read, write-once checksum),
//! assets and versions (read, status transitions). Each trait is implemented
//! for PostgreSQL and for an in-memory store.

use async_trait::async_trait;
use archive_pipeline_core::{
    Asset, AssetId, AssetsSummary, Blob, BlobId, Checksum, ValidationOutcome, ValidationRun,
    Version, VersionId,
};
use chrono::{DateTime, Utc};

use crate::error::DbResult;

/// Result of a conditional checksum write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumWrite {
    /// The checksum column was NULL and now holds the value
    Written,
    /// The same value was already stored
    Unchanged,
    /// A different value was already stored; nothing was written
    Conflict(Checksum),
}

/// Blob persistence
#[async_trait]
pub trait BlobRepository: Send + Sync {
    /// Insert a blob record (used by seeding and tests)
    async fn insert(&self, blob: Blob) -> DbResult<Blob>;

    /// Find a blob by its identifier
    ///
    /// # Returns
    /// * `Ok(Some(Blob))` - The blob if found
    /// * `Ok(None)` - If no blob with that ID exists
    /// * `Err(DbError)` - For database errors
    async fn find_by_id(&self, id: &BlobId) -> DbResult<Option<Blob>>;

    /// Persist the checksum only if none is stored yet
    ///
    /// # Arguments
    /// * `id` - The blob identifier
    /// * `checksum` - Freshly computed checksum
    ///
    /// # Returns
    /// * `Ok(ChecksumWrite)` - What happened to the stored value
    /// * `Err(DbError::NotFound)` - If the blob does not exist
    async fn set_checksum_if_unset(&self, id: &BlobId, checksum: &Checksum)
        -> DbResult<ChecksumWrite>;

    /// Check if the backing store is reachable
    async fn health_check(&self) -> DbResult<()>;
}

/// Asset persistence
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Insert an asset record (used by seeding and tests)
    async fn insert(&self, asset: Asset) -> DbResult<Asset>;

    /// Find an asset by its unique ID
    async fn find_by_id(&self, id: &AssetId) -> DbResult<Option<Asset>>;

    /// Identifiers of every asset currently referencing a blob
    async fn list_ids_by_blob(&self, blob_id: &BlobId) -> DbResult<Vec<AssetId>>;

    /// Move the asset into `VALIDATING` in its own transaction, starting a new run
    ///
    /// # Returns
    /// * `Ok(ValidationRun)` - Generation the caller must present when recording
    /// * `Err(DbError::NotFound)` - If the asset does not exist
    async fn mark_validating(&self, id: &AssetId) -> DbResult<ValidationRun>;

    /// Persist the terminal status together with its error records, atomically
    ///
    /// Previous error records are replaced; a valid outcome clears them.
    ///
    /// # Returns
    /// * `Ok(true)` - The outcome was recorded
    /// * `Ok(false)` - A later run superseded `run`; nothing was written
    async fn record_validation(
        &self,
        id: &AssetId,
        run: ValidationRun,
        outcome: &ValidationOutcome,
    ) -> DbResult<bool>;

    /// Claim assets stuck in `VALIDATING` since before `cutoff`
    ///
    /// Claimed rows get `updated_at = now`, so a row is claimed at most once
    /// per staleness window.
    async fn claim_stale_validating(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<AssetId>>;
}

/// Version persistence
#[async_trait]
pub trait VersionRepository: Send + Sync {
    /// Insert a version record (used by seeding and tests)
    async fn insert(&self, version: Version) -> DbResult<Version>;

    /// Attach an asset to a version
    async fn add_asset(&self, version_id: &VersionId, asset_id: &AssetId) -> DbResult<()>;

    /// Find a version by its unique ID
    async fn find_by_id(&self, id: &VersionId) -> DbResult<Option<Version>>;

    /// File count and byte total over the version's assets
    async fn asset_summary(&self, id: &VersionId) -> DbResult<AssetsSummary>;

    /// Move the version into `VALIDATING` in its own transaction, starting a new run
    async fn mark_validating(&self, id: &VersionId) -> DbResult<ValidationRun>;

    /// Persist the terminal status of `run`; `Ok(false)` if it was superseded
    async fn record_validation(
        &self,
        id: &VersionId,
        run: ValidationRun,
        outcome: &ValidationOutcome,
    ) -> DbResult<bool>;

    /// Claim versions stuck in `VALIDATING` since before `cutoff`
    async fn claim_stale_validating(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<VersionId>>;
}
