//! Task dispatch
//!
//! The dispatcher is the only place where one unit of work schedules another.
//! It turns `BlobChecksumReady` into one `ValidateAssetMetadata` task per asset
//! bound to the blob. The executor hands it the event inside the checksum
//! task, so a failed fan-out fails that task and the worker retries it.

use archive_pipeline_core::{EventType, PipelineEvent, Task, TaskEnvelope};
use archive_pipeline_db::{AssetRepository, TaskQueue};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::ServiceResult;

/// Routes events to follow-up tasks
#[derive(Clone)]
pub struct TaskDispatcher {
    assets: Arc<dyn AssetRepository>,
    queue: Arc<dyn TaskQueue>,
}

impl TaskDispatcher {
    /// Create a new dispatcher
    pub fn new(assets: Arc<dyn AssetRepository>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { assets, queue }
    }

    /// Schedule a task directly (e.g. `CalculateSha256` after an upload)
    pub async fn schedule(&self, task: Task) -> ServiceResult<TaskEnvelope> {
        let envelope = self.queue.submit(task).await?;
        debug!(task_id = %envelope.id, task = %envelope.task, "Task scheduled");
        Ok(envelope)
    }

    /// React to one event, returning the number of tasks enqueued
    ///
    /// Assets are listed at handling time, so every asset bound to the blob
    /// when the checksum becomes visible gets a validation task. On error some
    /// tasks may already be queued; repeating the call is safe.
    #[instrument(skip(self, event), fields(event = event.event_name()))]
    pub async fn handle_event(&self, event: &PipelineEvent) -> ServiceResult<usize> {
        match &event.event_type {
            EventType::BlobChecksumReady { blob_id, .. } => {
                let asset_ids = self.assets.list_ids_by_blob(blob_id).await?;
                for asset_id in &asset_ids {
                    self.queue
                        .submit(Task::ValidateAssetMetadata { asset_id: *asset_id })
                        .await?;
                }
                info!(blob_id = %blob_id, assets = asset_ids.len(), "Scheduled asset re-validation");
                Ok(asset_ids.len())
            }
            EventType::AssetValidated { .. } | EventType::VersionValidated { .. } => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_pipeline_core::{
        Asset, AssetId, Blob, BlobId, Checksum, StorageLocation, ValidationStatus,
    };
    use archive_pipeline_db::{BlobRepository, InMemoryRepository, LocalTaskQueue};
    use serde_json::json;

    async fn blob_with_assets(repo: &InMemoryRepository, count: usize) -> (BlobId, Vec<AssetId>) {
        let location = StorageLocation::file_system("/data", "blobs/x").unwrap();
        let blob = BlobRepository::insert(repo, Blob::new(location, 1, "etag-0").unwrap())
            .await
            .unwrap();
        let mut ids = Vec::new();
        for i in 0..count {
            let asset = Asset::new(format!("file-{}.txt", i), blob.id, json!({})).unwrap();
            ids.push(AssetRepository::insert(repo, asset).await.unwrap().id);
        }
        (blob.id, ids)
    }

    fn ready(blob_id: BlobId) -> PipelineEvent {
        PipelineEvent::blob_checksum_ready(blob_id, Checksum::sha256("d".repeat(64)).unwrap())
    }

    #[tokio::test]
    async fn test_checksum_ready_fans_out_once_per_asset() {
        let repo = Arc::new(InMemoryRepository::new());
        let (blob_id, mut asset_ids) = blob_with_assets(&repo, 3).await;
        let _ = blob_with_assets(&repo, 2).await;
        let (queue, mut receiver) = LocalTaskQueue::channel();
        let dispatcher = TaskDispatcher::new(repo, Arc::new(queue));

        assert_eq!(dispatcher.handle_event(&ready(blob_id)).await.unwrap(), 3);

        let mut scheduled = Vec::new();
        while let Some(envelope) = receiver.try_next() {
            match envelope.task {
                Task::ValidateAssetMetadata { asset_id } => scheduled.push(asset_id),
                other => panic!("unexpected task {}", other),
            }
        }
        scheduled.sort();
        asset_ids.sort();
        assert_eq!(scheduled, asset_ids);
    }

    #[tokio::test]
    async fn test_unreferenced_blob_schedules_nothing() {
        let repo = Arc::new(InMemoryRepository::new());
        let (queue, mut receiver) = LocalTaskQueue::channel();
        let dispatcher = TaskDispatcher::new(repo, Arc::new(queue));

        assert_eq!(dispatcher.handle_event(&ready(BlobId::new())).await.unwrap(), 0);
        assert!(receiver.try_next().is_none());
    }

    #[tokio::test]
    async fn test_validation_events_are_ignored() {
        let repo = Arc::new(InMemoryRepository::new());
        let (queue, mut receiver) = LocalTaskQueue::channel();
        let dispatcher = TaskDispatcher::new(repo, Arc::new(queue));

        let event = PipelineEvent::new(EventType::AssetValidated {
            asset_id: AssetId::new(),
            status: ValidationStatus::Valid,
            error_count: 0,
        });
        assert_eq!(dispatcher.handle_event(&event).await.unwrap(), 0);
        assert!(receiver.try_next().is_none());
    }

    #[tokio::test]
    async fn test_failed_submit_surfaces_error() {
        let repo = Arc::new(InMemoryRepository::new());
        let (blob_id, _) = blob_with_assets(&repo, 2).await;
        let (queue, receiver) = LocalTaskQueue::channel();
        drop(receiver);
        let dispatcher = TaskDispatcher::new(repo, Arc::new(queue));

        let err = dispatcher.handle_event(&ready(blob_id)).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
