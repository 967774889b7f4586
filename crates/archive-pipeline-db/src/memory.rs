//! In-memory implementation of the repository traits
//!
//! Used by tests and by `--in-memory` local runs. All maps sit behind one
//! `RwLock` so every write is atomic with respect to readers, matching the
//! per-transition transactions of the PostgreSQL store.

use async_trait::async_trait;
use archive_pipeline_core::{
    Asset, AssetId, AssetsSummary, Blob, BlobId, Checksum, ValidationOutcome, ValidationRun,
    ValidationStatus, Version, VersionId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{DbError, DbResult};
use crate::repository::{AssetRepository, BlobRepository, ChecksumWrite, VersionRepository};

#[derive(Debug, Default)]
struct Store {
    blobs: HashMap<BlobId, Blob>,
    assets: HashMap<AssetId, Asset>,
    versions: HashMap<VersionId, Version>,
    version_assets: HashMap<VersionId, BTreeSet<AssetId>>,
}

/// Repository holding everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the `updated_at` of an asset (lets tests age a stuck run)
    pub async fn touch_asset(&self, id: &AssetId, updated_at: DateTime<Utc>) -> DbResult<()> {
        let mut store = self.store.write().await;
        let asset = store
            .assets
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("asset {}", id)))?;
        asset.updated_at = updated_at;
        Ok(())
    }

    /// Overwrite the `updated_at` of a version
    pub async fn touch_version(&self, id: &VersionId, updated_at: DateTime<Utc>) -> DbResult<()> {
        let mut store = self.store.write().await;
        let version = store
            .versions
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("version {}", id)))?;
        version.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl BlobRepository for InMemoryRepository {
    async fn insert(&self, blob: Blob) -> DbResult<Blob> {
        let mut store = self.store.write().await;
        if store.blobs.contains_key(&blob.id) {
            return Err(DbError::UniqueViolation(format!("blob {}", blob.id)));
        }
        store.blobs.insert(blob.id, blob.clone());
        Ok(blob)
    }

    async fn find_by_id(&self, id: &BlobId) -> DbResult<Option<Blob>> {
        Ok(self.store.read().await.blobs.get(id).cloned())
    }

    #[instrument(skip(self, checksum), fields(blob_id = %id))]
    async fn set_checksum_if_unset(
        &self,
        id: &BlobId,
        checksum: &Checksum,
    ) -> DbResult<ChecksumWrite> {
        let mut store = self.store.write().await;
        let blob = store
            .blobs
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("blob {}", id)))?;

        match blob.set_checksum_once(checksum.clone()) {
            Ok(true) => Ok(ChecksumWrite::Written),
            Ok(false) => Ok(ChecksumWrite::Unchanged),
            Err(_) => {
                let existing = blob.sha256.clone().ok_or_else(|| {
                    DbError::Internal(format!("blob {} rejected checksum without one", id))
                })?;
                debug!(existing = %existing, "Checksum conflict");
                Ok(ChecksumWrite::Conflict(existing))
            }
        }
    }

    async fn health_check(&self) -> DbResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AssetRepository for InMemoryRepository {
    async fn insert(&self, asset: Asset) -> DbResult<Asset> {
        let mut store = self.store.write().await;
        if !store.blobs.contains_key(&asset.blob_id) {
            return Err(DbError::ForeignKeyViolation(format!(
                "asset {} references unknown blob {}",
                asset.id, asset.blob_id
            )));
        }
        if store.assets.contains_key(&asset.id) {
            return Err(DbError::UniqueViolation(format!("asset {}", asset.id)));
        }
        store.assets.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn find_by_id(&self, id: &AssetId) -> DbResult<Option<Asset>> {
        Ok(self.store.read().await.assets.get(id).cloned())
    }

    async fn list_ids_by_blob(&self, blob_id: &BlobId) -> DbResult<Vec<AssetId>> {
        let store = self.store.read().await;
        let mut ids: Vec<AssetId> = store
            .assets
            .values()
            .filter(|a| a.blob_id == *blob_id)
            .map(|a| a.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    #[instrument(skip(self), fields(asset_id = %id))]
    async fn mark_validating(&self, id: &AssetId) -> DbResult<ValidationRun> {
        let mut store = self.store.write().await;
        let asset = store
            .assets
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("asset {}", id)))?;
        Ok(asset.begin_validation()?)
    }

    #[instrument(skip(self, outcome), fields(asset_id = %id, run = %run, status = %outcome.status()))]
    async fn record_validation(
        &self,
        id: &AssetId,
        run: ValidationRun,
        outcome: &ValidationOutcome,
    ) -> DbResult<bool> {
        let mut store = self.store.write().await;
        let asset = store
            .assets
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("asset {}", id)))?;

        let recorded = asset.complete_validation(run, outcome.clone())?;
        if !recorded {
            debug!(current = %asset.validation_run, "Superseded run, outcome dropped");
        }
        Ok(recorded)
    }

    async fn claim_stale_validating(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<AssetId>> {
        let mut store = self.store.write().await;
        let mut stale: Vec<&mut Asset> = store
            .assets
            .values_mut()
            .filter(|a| a.status == ValidationStatus::Validating && a.updated_at < cutoff)
            .collect();
        stale.sort_by_key(|a| a.updated_at);
        Ok(stale
            .into_iter()
            .map(|a| {
                a.updated_at = now;
                a.id
            })
            .collect())
    }
}

#[async_trait]
impl VersionRepository for InMemoryRepository {
    async fn insert(&self, version: Version) -> DbResult<Version> {
        let mut store = self.store.write().await;
        let duplicate = store.versions.values().any(|v| {
            v.id == version.id
                || (v.dandiset_id == version.dandiset_id && v.version == version.version)
        });
        if duplicate {
            return Err(DbError::UniqueViolation(format!(
                "version {} of dandiset {}",
                version.version, version.dandiset_id
            )));
        }
        store.versions.insert(version.id, version.clone());
        Ok(version)
    }

    async fn add_asset(&self, version_id: &VersionId, asset_id: &AssetId) -> DbResult<()> {
        let mut store = self.store.write().await;
        if !store.versions.contains_key(version_id) {
            return Err(DbError::ForeignKeyViolation(format!("version {}", version_id)));
        }
        if !store.assets.contains_key(asset_id) {
            return Err(DbError::ForeignKeyViolation(format!("asset {}", asset_id)));
        }
        store
            .version_assets
            .entry(*version_id)
            .or_default()
            .insert(*asset_id);
        Ok(())
    }

    async fn find_by_id(&self, id: &VersionId) -> DbResult<Option<Version>> {
        Ok(self.store.read().await.versions.get(id).cloned())
    }

    async fn asset_summary(&self, id: &VersionId) -> DbResult<AssetsSummary> {
        let store = self.store.read().await;
        let mut summary = AssetsSummary::default();

        for asset_id in store.version_assets.get(id).into_iter().flatten() {
            let Some(asset) = store.assets.get(asset_id) else {
                continue;
            };
            summary.number_of_files += 1;
            if let Some(blob) = store.blobs.get(&asset.blob_id) {
                summary.number_of_bytes += blob.size;
            }
        }

        Ok(summary)
    }

    #[instrument(skip(self), fields(version_id = %id))]
    async fn mark_validating(&self, id: &VersionId) -> DbResult<ValidationRun> {
        let mut store = self.store.write().await;
        let version = store
            .versions
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("version {}", id)))?;
        Ok(version.begin_validation()?)
    }

    #[instrument(skip(self, outcome), fields(version_id = %id, run = %run, status = %outcome.status()))]
    async fn record_validation(
        &self,
        id: &VersionId,
        run: ValidationRun,
        outcome: &ValidationOutcome,
    ) -> DbResult<bool> {
        let mut store = self.store.write().await;
        let version = store
            .versions
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("version {}", id)))?;
        Ok(version.complete_validation(run, outcome.clone())?)
    }

    async fn claim_stale_validating(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<VersionId>> {
        let mut store = self.store.write().await;
        let mut stale: Vec<&mut Version> = store
            .versions
            .values_mut()
            .filter(|v| v.status == ValidationStatus::Validating && v.updated_at < cutoff)
            .collect();
        stale.sort_by_key(|v| v.updated_at);
        Ok(stale
            .into_iter()
            .map(|v| {
                v.updated_at = now;
                v.id
            })
            .collect())
    }
}
