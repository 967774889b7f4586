//! Core domain models and types for the archive validation pipeline
//!
//! This crate contains the data structures, enums, and state-machine rules
//! that describe blobs, assets, dataset versions, validation outcomes and the
//! units of work exchanged between pipeline components.

pub mod asset;
pub mod blob;
pub mod checksum;
pub mod error;
pub mod event;
pub mod storage;
pub mod task;
pub mod types;
pub mod version;

// Re-exports for convenience
pub use asset::Asset;
pub use blob::Blob;
pub use checksum::{Checksum, HashAlgorithm};
pub use error::{PipelineError, Result};
pub use event::{EventType, PipelineEvent};
pub use storage::{StorageBackend, StorageLocation};
pub use task::{Task, TaskEnvelope};
pub use types::{
    AssetId, BlobId, DandisetId, ValidationErrorRecord, ValidationOutcome, ValidationRun,
    ValidationStatus, VersionId,
};
pub use version::{AssetsSummary, Version, VersionTag};
