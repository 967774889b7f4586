//! Publish-view rendering
//!
//! Validators never look at stored metadata directly. They validate the
//! document an asset or version would be published with: the stored metadata
//! plus the fields only the archive can fill in (identifiers, digests, sizes,
//! publication provenance).

use archive_pipeline_core::{Asset, AssetsSummary, Blob, Version, VersionTag};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Default public archive URL
pub const DEFAULT_ARCHIVE_URL: &str = "https://dandiarchive.org";

/// Renders publish views of stored metadata
pub trait PublishRenderer: Send + Sync {
    /// Publish view of an asset bound to `blob`
    fn render_asset(&self, asset: &Asset, blob: &Blob, published_at: DateTime<Utc>) -> Value;

    /// Publish view of a version with the given asset totals
    fn render_version(
        &self,
        version: &Version,
        summary: &AssetsSummary,
        published_at: DateTime<Utc>,
    ) -> Value;
}

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Public archive base URL
    pub archive_url: String,
    /// Name recorded on the publish activity
    pub published_by: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            published_by: "DANDI publish".to_string(),
        }
    }
}

/// Renderer producing DANDI-style publish documents
#[derive(Debug, Clone, Default)]
pub struct DefaultPublishRenderer {
    config: RenderConfig,
}

impl DefaultPublishRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    fn archive_url(&self) -> &str {
        self.config.archive_url.trim_end_matches('/')
    }

    fn publish_activity(&self, published_at: DateTime<Utc>) -> Value {
        let at = timestamp(published_at);
        json!({
            "id": format!("urn:uuid:{}", Uuid::new_v4()),
            "name": self.config.published_by,
            "startDate": at,
            "endDate": at,
            "schemaKey": "PublishActivity",
        })
    }
}

impl PublishRenderer for DefaultPublishRenderer {
    fn render_asset(&self, asset: &Asset, blob: &Blob, published_at: DateTime<Utc>) -> Value {
        let mut document = match &asset.metadata {
            Value::Object(map) => map.clone(),
            other => return other.clone(),
        };

        let mut digest = Map::new();
        digest.insert("dandi:dandi-etag".to_string(), json!(blob.etag));
        if let Some(checksum) = &blob.sha256 {
            digest.insert(
                checksum.algorithm().digest_key().to_string(),
                json!(checksum.value()),
            );
        }

        let mut content_url = vec![json!(format!(
            "{}/api/assets/{}/download/",
            self.archive_url(),
            asset.id
        ))];
        content_url.push(json!(match blob.location.http_url() {
            Ok(url) => url.to_string(),
            Err(_) => blob.location.uri(),
        }));

        document.insert("id".to_string(), json!(format!("dandiasset:{}", asset.id)));
        document.insert("identifier".to_string(), json!(asset.id.to_string()));
        document.insert("path".to_string(), json!(asset.path));
        document.insert("contentSize".to_string(), json!(blob.size));
        document.insert("digest".to_string(), Value::Object(digest));
        document.insert("contentUrl".to_string(), Value::Array(content_url));
        document.insert("datePublished".to_string(), json!(timestamp(published_at)));
        document.insert("publishedBy".to_string(), self.publish_activity(published_at));

        Value::Object(document)
    }

    fn render_version(
        &self,
        version: &Version,
        summary: &AssetsSummary,
        published_at: DateTime<Utc>,
    ) -> Value {
        let mut document = match &version.metadata {
            Value::Object(map) => map.clone(),
            other => return other.clone(),
        };

        let tag = match &version.version {
            VersionTag::Draft => publish_version_tag(published_at),
            VersionTag::Published(v) => v.clone(),
        };
        let dandiset = version.dandiset_id;

        document.insert("id".to_string(), json!(format!("DANDI:{}/{}", dandiset, tag)));
        document.insert("identifier".to_string(), json!(format!("DANDI:{}", dandiset)));
        document.insert("name".to_string(), json!(version.name));
        document.insert("version".to_string(), json!(tag));
        document.insert(
            "url".to_string(),
            json!(format!("{}/dandiset/{}/{}", self.archive_url(), dandiset, tag)),
        );
        document.insert(
            "assetsSummary".to_string(),
            json!({
                "numberOfBytes": summary.number_of_bytes,
                "numberOfFiles": summary.number_of_files,
                "schemaKey": "AssetsSummary",
            }),
        );
        document.insert("datePublished".to_string(), json!(timestamp(published_at)));
        document.insert("publishedBy".to_string(), self.publish_activity(published_at));

        Value::Object(document)
    }
}

/// Version string a draft would be published under (`0.YYMMDD.HHMM`)
pub fn publish_version_tag(at: DateTime<Utc>) -> String {
    format!("0.{}", at.format("%y%m%d.%H%M"))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
