//! Blob checksum computation
//!
//! Streams a blob, hashes it incrementally with SHA-256, persists the digest
//! write-once and announces it with a `BlobChecksumReady` event. The executor
//! hands the same event to the dispatcher, which re-validates every dependent
//! asset.

use archive_pipeline_core::{BlobId, Checksum, PipelineEvent};
use archive_pipeline_db::{BlobRepository, ChecksumWrite, EventPublisher};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::storage::{BlobReader, ByteStream};

/// What a checksum run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    /// The blob
    pub blob_id: BlobId,
    /// Persisted checksum
    pub checksum: Checksum,
    /// False when the checksum was already stored before this run
    pub newly_written: bool,
}

impl ChecksumReport {
    /// The `BlobChecksumReady` event for this report
    pub fn ready_event(&self) -> PipelineEvent {
        PipelineEvent::blob_checksum_ready(self.blob_id, self.checksum.clone())
    }
}

/// Computes and persists blob checksums
pub struct ChecksumComputer {
    blobs: Arc<dyn BlobRepository>,
    reader: Arc<dyn BlobReader>,
    events: Arc<dyn EventPublisher>,
}

impl ChecksumComputer {
    /// Create a new checksum computer
    pub fn new(
        blobs: Arc<dyn BlobRepository>,
        reader: Arc<dyn BlobReader>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            blobs,
            reader,
            events,
        }
    }

    /// Compute, persist and announce the checksum of one blob
    ///
    /// Safe to repeat: once a checksum is stored the blob is not read again,
    /// and the report is rebuilt from the stored value. The ready event is
    /// published on every run; a failed publish is logged, not returned.
    ///
    /// # Errors
    /// * `NotFound` if the blob does not exist
    /// * `Storage`/`SizeMismatch` if the content cannot be read in full; nothing is written
    /// * `ChecksumConflict` if a different checksum is already stored
    #[instrument(skip(self), fields(blob_id = %blob_id))]
    pub async fn compute(&self, blob_id: &BlobId) -> ServiceResult<ChecksumReport> {
        let blob = self
            .blobs
            .find_by_id(blob_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("blob {}", blob_id)))?;

        let report = match blob.sha256 {
            Some(existing) => {
                debug!(checksum = %existing, "Checksum already stored, skipping read");
                ChecksumReport {
                    blob_id: *blob_id,
                    checksum: existing,
                    newly_written: false,
                }
            }
            None => {
                let stream = self.reader.open(&blob.location).await?;
                let checksum = sha256_of(stream, blob.size).await?;

                let newly_written = match self.blobs.set_checksum_if_unset(blob_id, &checksum).await? {
                    ChecksumWrite::Written => true,
                    ChecksumWrite::Unchanged => false,
                    ChecksumWrite::Conflict(existing) => {
                        return Err(ServiceError::ChecksumConflict {
                            expected: existing.value().to_string(),
                            actual: checksum.value().to_string(),
                        });
                    }
                };

                info!(checksum = %checksum, bytes = blob.size, newly_written, "Blob checksum computed");
                ChecksumReport {
                    blob_id: *blob_id,
                    checksum,
                    newly_written,
                }
            }
        };

        if let Err(e) = self.events.publish(report.ready_event()).await {
            warn!(error = %e, "Failed to publish checksum ready event");
        }

        Ok(report)
    }
}

/// Hash a byte stream that must hold exactly `declared_size` bytes
///
/// Reading stops with `SizeMismatch` as soon as the stream runs past
/// `declared_size`; a short stream fails the same way once it ends.
pub async fn sha256_of(mut stream: ByteStream, declared_size: u64) -> ServiceResult<Checksum> {
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ServiceError::Storage(format!("Read failed: {}", e)))?;
        total += chunk.len() as u64;
        if total > declared_size {
            return Err(ServiceError::SizeMismatch {
                declared: declared_size,
                actual: total,
            });
        }
        hasher.update(&chunk);
    }

    if total != declared_size {
        return Err(ServiceError::SizeMismatch {
            declared: declared_size,
            actual: total,
        });
    }
    Ok(Checksum::sha256(format!("{:x}", hasher.finalize()))?)
}
