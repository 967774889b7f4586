//! Validation and integrity pipeline for the archive
//!
//! This crate implements the units of work the pipeline schedules and the
//! machinery that runs them.
//!
//! # Architecture
//!
//! - **ChecksumComputer**: streams a blob, persists its SHA-256 write-once and
//!   emits `BlobChecksumReady`
//! - **ErrorNormalizer** ([`normalize`]): flattens model- and schema-shaped
//!   validation errors into `{field, message}` records
//! - **AssetValidator** / **VersionValidator**: render the publish view,
//!   validate it and record `VALID`/`INVALID` with the normalized errors
//! - **TaskDispatcher**: turns `BlobChecksumReady` into one asset validation
//!   task per dependent asset, inside the checksum task that produced it
//! - **TaskExecutor** / **WorkerPool**: route and run queued tasks with
//!   bounded concurrency and retries
//! - **StaleValidationSweeper**: re-enqueues validations stuck in `VALIDATING`
//!
//! # Example
//!
//! ```rust,no_run
//! use archive_pipeline_db::{ChannelEventPublisher, InMemoryRepository, LocalTaskQueue};
//! use archive_pipeline_service::{
//!     DefaultBlobReader, JsonSchemaValidator, PipelineServices, SchemaConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = Arc::new(InMemoryRepository::new());
//! let (queue, _tasks) = LocalTaskQueue::channel();
//! let (events, _event_rx) = ChannelEventPublisher::channel(128);
//!
//! let services = PipelineServices::builder(repo.clone(), repo.clone(), repo)
//!     .queue(Arc::new(queue))
//!     .events(Arc::new(events))
//!     .reader(Arc::new(DefaultBlobReader::new(Duration::from_secs(30))?))
//!     .validator(Arc::new(JsonSchemaValidator::new(&SchemaConfig::default())?))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod asset_validation;
pub mod checksum;
pub mod dispatch;
pub mod doi;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod normalize;
pub mod render;
pub mod schema;
pub mod storage;
pub mod sweep;
pub mod version_validation;
pub mod worker;

pub use asset_validation::AssetValidator;
pub use checksum::{sha256_of, ChecksumComputer, ChecksumReport};
pub use dispatch::TaskDispatcher;
pub use doi::{DataCiteClient, DataCiteConfig, DisabledDoiClient, DoiClient};
pub use error::{ServiceError, ServiceResult};
pub use executor::{TaskExecutor, TaskHandler};
pub use manifest::ManifestWriter;
pub use normalize::{
    normalize, normalize_error, outcome_from_result, PathSegment, RawValidationError,
    SchemaValidationFailure, SchemaViolation,
};
pub use render::{DefaultPublishRenderer, PublishRenderer, RenderConfig};
pub use schema::{JsonSchemaValidator, MetadataValidator, SchemaConfig, SchemaKey};
pub use storage::{BlobReader, ByteStream, DefaultBlobReader};
pub use sweep::{StaleValidationSweeper, SweepReport};
pub use version_validation::{VersionValidator, PLACEHOLDER_DOI};
pub use worker::{TaskDisposition, WorkerConfig, WorkerPool};

use archive_pipeline_db::{
    AssetRepository, BlobRepository, EventPublisher, TaskQueue, VersionRepository,
};
use std::sync::Arc;

/// All pipeline components wired over one set of collaborators
#[derive(Clone)]
pub struct PipelineServices {
    /// Checksum computation
    pub checksums: Arc<ChecksumComputer>,
    /// Asset validation
    pub assets: Arc<AssetValidator>,
    /// Version validation
    pub versions: Arc<VersionValidator>,
    /// Direct scheduling and event to task fan-out
    pub dispatcher: TaskDispatcher,
    /// Task routing, handed to a [`WorkerPool`]
    pub executor: Arc<TaskExecutor>,
}

impl PipelineServices {
    /// Start wiring services over the given repositories
    pub fn builder(
        blobs: Arc<dyn BlobRepository>,
        assets: Arc<dyn AssetRepository>,
        versions: Arc<dyn VersionRepository>,
    ) -> PipelineServicesBuilder {
        PipelineServicesBuilder {
            blobs,
            assets,
            versions,
            queue: None,
            events: None,
            reader: None,
            validator: None,
            renderer: Arc::new(DefaultPublishRenderer::default()),
            doi: Arc::new(DisabledDoiClient),
            manifests: None,
        }
    }
}

/// Builder for [`PipelineServices`]
///
/// Queue, event publisher, blob reader and metadata validator are required.
/// The renderer defaults to [`DefaultPublishRenderer`], DOI management to
/// [`DisabledDoiClient`], and manifest tasks are skipped without a writer.
pub struct PipelineServicesBuilder {
    blobs: Arc<dyn BlobRepository>,
    assets: Arc<dyn AssetRepository>,
    versions: Arc<dyn VersionRepository>,
    queue: Option<Arc<dyn TaskQueue>>,
    events: Option<Arc<dyn EventPublisher>>,
    reader: Option<Arc<dyn BlobReader>>,
    validator: Option<Arc<dyn MetadataValidator>>,
    renderer: Arc<dyn PublishRenderer>,
    doi: Arc<dyn DoiClient>,
    manifests: Option<Arc<dyn ManifestWriter>>,
}

impl PipelineServicesBuilder {
    pub fn queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn reader(mut self, reader: Arc<dyn BlobReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn MetadataValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PublishRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn doi_client(mut self, doi: Arc<dyn DoiClient>) -> Self {
        self.doi = doi;
        self
    }

    pub fn manifest_writer(mut self, writer: Arc<dyn ManifestWriter>) -> Self {
        self.manifests = Some(writer);
        self
    }

    /// Wire every component
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` if a required collaborator is missing
    pub fn build(self) -> ServiceResult<PipelineServices> {
        let queue = required(self.queue, "task queue")?;
        let events = required(self.events, "event publisher")?;
        let reader = required(self.reader, "blob reader")?;
        let validator = required(self.validator, "metadata validator")?;

        let checksums = Arc::new(ChecksumComputer::new(
            self.blobs.clone(),
            reader,
            events.clone(),
        ));
        let assets = Arc::new(AssetValidator::new(
            self.assets.clone(),
            self.blobs,
            self.renderer.clone(),
            validator.clone(),
            events.clone(),
        ));
        let versions = Arc::new(VersionValidator::new(
            self.versions.clone(),
            self.renderer,
            validator,
            events,
        ));

        let dispatcher = TaskDispatcher::new(self.assets, queue);
        let mut executor = TaskExecutor::new(
            checksums.clone(),
            dispatcher.clone(),
            assets.clone(),
            versions.clone(),
            self.versions,
            self.doi,
        );
        if let Some(writer) = self.manifests {
            executor = executor.with_manifest_writer(writer);
        }

        Ok(PipelineServices {
            checksums,
            assets,
            versions,
            dispatcher,
            executor: Arc::new(executor),
        })
    }
}

fn required<T>(value: Option<T>, name: &str) -> ServiceResult<T> {
    value.ok_or_else(|| ServiceError::Configuration(format!("Pipeline requires a {}", name)))
}
