//! Stale validation sweep
//!
//! A crash between the `VALIDATING` flip and the terminal write leaves the
//! entity in `VALIDATING`. If no retry arrives, the sweep re-enqueues a
//! validation task for every entity that has stayed there past `stale_after`.
//! Claiming a row restamps it, so one stuck entity yields one task per window.

use archive_pipeline_core::Task;
use archive_pipeline_db::{AssetRepository, TaskQueue, VersionRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::error::{ServiceError, ServiceResult};

/// Tasks re-enqueued by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub assets: usize,
    pub versions: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.assets + self.versions
    }
}

/// Re-enqueues validations stuck in `VALIDATING`
pub struct StaleValidationSweeper {
    assets: Arc<dyn AssetRepository>,
    versions: Arc<dyn VersionRepository>,
    queue: Arc<dyn TaskQueue>,
    stale_after: chrono::Duration,
}

impl StaleValidationSweeper {
    /// Create a sweeper
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` if `stale_after` is out of range
    pub fn new(
        assets: Arc<dyn AssetRepository>,
        versions: Arc<dyn VersionRepository>,
        queue: Arc<dyn TaskQueue>,
        stale_after: Duration,
    ) -> ServiceResult<Self> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| ServiceError::Configuration(format!("Invalid stale threshold: {}", e)))?;
        Ok(Self {
            assets,
            versions,
            queue,
            stale_after,
        })
    }

    /// Sweep once, treating entities last touched before `now - stale_after` as stale
    #[instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> ServiceResult<SweepReport> {
        let cutoff = now - self.stale_after;
        let mut report = SweepReport::default();

        for asset_id in self.assets.claim_stale_validating(cutoff, now).await? {
            self.queue
                .submit(Task::ValidateAssetMetadata { asset_id })
                .await?;
            report.assets += 1;
        }

        for version_id in self.versions.claim_stale_validating(cutoff, now).await? {
            self.queue
                .submit(Task::ValidateVersionMetadata { version_id })
                .await?;
            report.versions += 1;
        }

        if report.total() > 0 {
            info!(
                assets = report.assets,
                versions = report.versions,
                "Re-enqueued stale validations"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` fires
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!(error = %e, "Stale validation sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_pipeline_core::{Asset, Blob, DandisetId, StorageLocation, Version};
    use archive_pipeline_db::{BlobRepository, InMemoryRepository, LocalTaskQueue};
    use serde_json::json;

    #[tokio::test]
    async fn test_sweep_requeues_only_stale_entities() {
        let repo = Arc::new(InMemoryRepository::new());
        let now = Utc::now();

        let location = StorageLocation::file_system("/data", "blobs/x").unwrap();
        let blob = BlobRepository::insert(repo.as_ref(), Blob::new(location, 1, "e").unwrap())
            .await
            .unwrap();

        let stale = Asset::new("stale.txt", blob.id, json!({})).unwrap();
        let stale = AssetRepository::insert(repo.as_ref(), stale).await.unwrap();
        AssetRepository::mark_validating(repo.as_ref(), &stale.id).await.unwrap();
        repo.touch_asset(&stale.id, now - chrono::Duration::hours(2))
            .await
            .unwrap();

        let fresh = Asset::new("fresh.txt", blob.id, json!({})).unwrap();
        let fresh = AssetRepository::insert(repo.as_ref(), fresh).await.unwrap();
        AssetRepository::mark_validating(repo.as_ref(), &fresh.id).await.unwrap();

        let version = Version::draft(DandisetId::new(3).unwrap(), "v", json!({})).unwrap();
        let version = VersionRepository::insert(repo.as_ref(), version).await.unwrap();
        VersionRepository::mark_validating(repo.as_ref(), &version.id).await.unwrap();
        repo.touch_version(&version.id, now - chrono::Duration::hours(2))
            .await
            .unwrap();

        let (queue, mut receiver) = LocalTaskQueue::channel();
        let sweeper = StaleValidationSweeper::new(
            repo.clone(),
            repo.clone(),
            Arc::new(queue),
            Duration::from_secs(3600),
        )
        .unwrap();

        let report = sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report, SweepReport { assets: 1, versions: 1 });

        let first = receiver.try_next().unwrap();
        assert_eq!(first.task, Task::ValidateAssetMetadata { asset_id: stale.id });
        let second = receiver.try_next().unwrap();
        assert_eq!(
            second.task,
            Task::ValidateVersionMetadata {
                version_id: version.id
            }
        );
        assert!(receiver.try_next().is_none());
    }

    #[tokio::test]
    async fn test_empty_store_sweeps_nothing() {
        let repo = Arc::new(InMemoryRepository::new());
        let (queue, _receiver) = LocalTaskQueue::channel();
        let sweeper =
            StaleValidationSweeper::new(repo.clone(), repo, Arc::new(queue), Duration::from_secs(60))
                .unwrap();
        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_stuck_entity_requeued_once_per_window() {
        let repo = Arc::new(InMemoryRepository::new());
        let now = Utc::now();

        let location = StorageLocation::file_system("/data", "blobs/y").unwrap();
        let blob = BlobRepository::insert(repo.as_ref(), Blob::new(location, 1, "e").unwrap())
            .await
            .unwrap();
        let asset = Asset::new("stuck.txt", blob.id, json!({})).unwrap();
        let asset = AssetRepository::insert(repo.as_ref(), asset).await.unwrap();
        AssetRepository::mark_validating(repo.as_ref(), &asset.id).await.unwrap();
        repo.touch_asset(&asset.id, now - chrono::Duration::hours(2))
            .await
            .unwrap();

        let (queue, mut receiver) = LocalTaskQueue::channel();
        let sweeper = StaleValidationSweeper::new(
            repo.clone(),
            repo.clone(),
            Arc::new(queue),
            Duration::from_secs(3600),
        )
        .unwrap();

        assert_eq!(sweeper.sweep_once(now).await.unwrap().assets, 1);
        assert_eq!(
            sweeper
                .sweep_once(now + chrono::Duration::seconds(30))
                .await
                .unwrap()
                .total(),
            0
        );
        assert!(receiver.try_next().is_some());
        assert!(receiver.try_next().is_none());

        // Still stuck a full window later: claimed again
        let later = now + chrono::Duration::hours(1) + chrono::Duration::seconds(1);
        assert_eq!(sweeper.sweep_once(later).await.unwrap().assets, 1);
    }
}
