//! Pipeline events
//!
//! Events are facts emitted by pipeline components after a state change has
//! been committed. The dispatcher turns some of them into follow-up tasks;
//! external observers may subscribe to all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checksum::Checksum;
use crate::types::{AssetId, BlobId, ValidationStatus, VersionId};

/// Types of events emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    /// A blob's checksum is persisted and dependents may be re-validated
    BlobChecksumReady {
        /// Blob whose checksum is available
        blob_id: BlobId,
        /// The persisted checksum
        checksum: Checksum,
    },

    /// An asset validation run finished
    AssetValidated {
        /// Validated asset
        asset_id: AssetId,
        /// Terminal status
        status: ValidationStatus,
        /// Number of error records persisted
        error_count: usize,
    },

    /// A version validation run finished
    VersionValidated {
        /// Validated version
        version_id: VersionId,
        /// Terminal status
        status: ValidationStatus,
        /// Number of error records persisted
        error_count: usize,
    },
}

impl EventType {
    /// Get a stable name for the event type, used as a subject suffix
    pub fn event_name(&self) -> &'static str {
        match self {
            EventType::BlobChecksumReady { .. } => "blob_checksum_ready",
            EventType::AssetValidated { .. } => "asset_validated",
            EventType::VersionValidated { .. } => "version_validated",
        }
    }

    /// Whether the event reports a failed validation
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventType::AssetValidated {
                status: ValidationStatus::Invalid,
                ..
            } | EventType::VersionValidated {
                status: ValidationStatus::Invalid,
                ..
            }
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

/// An event with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Event type and details
    #[serde(flatten)]
    pub event_type: EventType,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Optional correlation ID, usually the id of the task that produced it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl PipelineEvent {
    /// Create a new event with the current timestamp
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Shorthand for a checksum-ready event
    pub fn blob_checksum_ready(blob_id: BlobId, checksum: Checksum) -> Self {
        Self::new(EventType::BlobChecksumReady { blob_id, checksum })
    }

    /// Get the event name
    pub fn event_name(&self) -> &'static str {
        self.event_type.event_name()
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"), self.event_type)
    }
}
