//! Common test utilities and helpers
//!
//! [`TestPipeline`] wires the full pipeline over the in-memory repository,
//! an in-process task queue and blobs stored in a temporary directory. Tasks
//! are run explicitly so tests control every step.

#![allow(dead_code)]

use archive_pipeline_core::{PipelineEvent, Task, TaskEnvelope};
use archive_pipeline_db::{
    ChannelEventPublisher, InMemoryRepository, LocalTaskQueue, LocalTaskReceiver,
};
use archive_pipeline_service::{
    DefaultBlobReader, JsonSchemaValidator, PipelineServices, SchemaConfig, ServiceResult,
    TaskHandler,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub mod fixtures;

/// Fully wired pipeline for integration tests
pub struct TestPipeline {
    pub repo: Arc<InMemoryRepository>,
    pub services: PipelineServices,
    pub queue: Arc<LocalTaskQueue>,
    pub tasks: LocalTaskReceiver,
    pub events: mpsc::Receiver<PipelineEvent>,
    pub storage: TempDir,
}

impl TestPipeline {
    /// Pipeline accepting schema version [`fixtures::SCHEMA_VERSION`]
    pub fn new() -> Self {
        Self::with_event_capacity(256)
    }

    /// Pipeline whose event channel holds at most `capacity` unread events
    pub fn with_event_capacity(capacity: usize) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let (queue, tasks) = LocalTaskQueue::channel();
        let queue = Arc::new(queue);
        let (publisher, events) = ChannelEventPublisher::channel(capacity);

        let services = PipelineServices::builder(repo.clone(), repo.clone(), repo.clone())
            .queue(queue.clone())
            .events(Arc::new(publisher))
            .reader(Arc::new(
                DefaultBlobReader::new(Duration::from_secs(5)).expect("blob reader"),
            ))
            .validator(Arc::new(
                JsonSchemaValidator::new(&SchemaConfig::for_version(fixtures::SCHEMA_VERSION))
                    .expect("schemas compile"),
            ))
            .build()
            .expect("pipeline wiring");

        Self {
            repo,
            services,
            queue,
            tasks,
            events,
            storage: tempfile::tempdir().expect("temp dir"),
        }
    }

    /// Take every event published so far
    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Drain queued tasks without executing them
    pub fn take_tasks(&mut self) -> Vec<TaskEnvelope> {
        let mut taken = Vec::new();
        while let Some(envelope) = self.tasks.try_next() {
            taken.push(envelope);
        }
        taken
    }

    /// Execute one task through the executor, discarding its events
    pub async fn execute(&mut self, task: Task) -> ServiceResult<()> {
        let result = self.services.executor.handle(&task).await;
        self.drain_events();
        result
    }

    /// Execute queued tasks (and the follow-ups they schedule) until the
    /// queue is empty, returning the tasks run in order
    pub async fn run_until_idle(&mut self) -> Vec<Task> {
        let mut executed = Vec::new();
        while let Some(envelope) = self.tasks.try_next() {
            self.execute(envelope.task.clone())
                .await
                .expect("task succeeds");
            executed.push(envelope.task);
        }
        executed
    }
}
