//! Manifest writer seam
//!
//! Manifest files (`dandiset.yaml`, `assets.jsonld`, ...) are produced by a
//! separate subsystem. The pipeline only routes `WriteManifestFiles` tasks to
//! it through this trait.

use archive_pipeline_core::Version;
use async_trait::async_trait;

use crate::error::ServiceResult;

/// Writes the manifest files of a version
#[async_trait]
pub trait ManifestWriter: Send + Sync {
    /// Write every manifest file of `version`, replacing older copies
    async fn write(&self, version: &Version) -> ServiceResult<()>;
}
