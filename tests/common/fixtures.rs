//! Test fixtures
//!
//! Mirrors the development seed: one 20-byte text blob, one asset bound to it
//! and a draft version of dandiset 000001 holding that asset.

use archive_pipeline_core::{Asset, Blob, DandisetId, StorageLocation, Version};
use archive_pipeline_db::{AssetRepository, BlobRepository, InMemoryRepository, VersionRepository};
use serde_json::{json, Value};
use std::path::Path;

/// Schema version the test pipeline accepts
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Content of the seeded blob (20 bytes)
pub const DEV_BLOB_CONTENT: &[u8] = b"foo bar baz qux quux";

/// Upload etag of the seeded blob
pub const DEV_BLOB_ETAG: &str = "76d36e98f312e98ff908c8c82c8dd623-0";

/// SHA-256 of [`DEV_BLOB_CONTENT`]
pub fn dev_blob_sha256() -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(DEV_BLOB_CONTENT))
}

/// Everything the development seed creates
pub struct DevSeed {
    pub blob: Blob,
    pub asset: Asset,
    pub version: Version,
}

/// Metadata of the seeded draft version
pub fn version_metadata(schema_version: &str) -> Value {
    json!({
        "schemaVersion": schema_version,
        "schemaKey": "Dandiset",
        "description": "An informative description",
        "license": ["spdx:CC0-1.0"],
        "contributor": [{
            "name": "Doe, John",
            "email": "jdoe@example.com",
            "roleName": ["dcite:ContactPerson"],
            "schemaKey": "Person"
        }]
    })
}

/// Metadata of the seeded asset
pub fn asset_metadata(schema_version: &str) -> Value {
    json!({
        "schemaVersion": schema_version,
        "encodingFormat": "text/plain",
        "schemaKey": "Asset"
    })
}

/// Write `content` under `storage_root` and insert the blob record
pub async fn insert_blob(
    repo: &InMemoryRepository,
    storage_root: &Path,
    key: &str,
    content: &[u8],
) -> Blob {
    let path = storage_root.join(key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(&path, content).await.unwrap();

    let location =
        StorageLocation::file_system(storage_root.to_string_lossy().to_string(), key).unwrap();
    let blob = Blob::new(location, content.len() as u64, DEV_BLOB_ETAG).unwrap();
    BlobRepository::insert(repo, blob).await.unwrap()
}

/// Insert an asset bound to `blob`
pub async fn insert_asset(repo: &InMemoryRepository, blob: &Blob, path: &str, metadata: Value) -> Asset {
    let asset = Asset::new(path, blob.id, metadata).unwrap();
    AssetRepository::insert(repo, asset).await.unwrap()
}

/// Insert a draft version of dandiset `dandiset`
pub async fn insert_draft(repo: &InMemoryRepository, dandiset: u32, metadata: Value) -> Version {
    let version = Version::draft(DandisetId::new(dandiset).unwrap(), "Development Dandiset", metadata)
        .unwrap();
    VersionRepository::insert(repo, version).await.unwrap()
}

/// Seed the development dandiset
pub async fn seed_dev_dandiset(repo: &InMemoryRepository, storage_root: &Path) -> DevSeed {
    let blob = insert_blob(repo, storage_root, "blobs/76d/36e/dev", DEV_BLOB_CONTENT).await;
    let asset = insert_asset(repo, &blob, "foo/bar.txt", asset_metadata(SCHEMA_VERSION)).await;
    let version = insert_draft(repo, 1, version_metadata(SCHEMA_VERSION)).await;
    VersionRepository::add_asset(repo, &version.id, &asset.id)
        .await
        .unwrap();

    DevSeed {
        blob,
        asset,
        version,
    }
}
