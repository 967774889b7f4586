//! Blob readers
//!
//! A [`BlobReader`] opens a blob's byte stream from its [`StorageLocation`].
//! Bytes are never buffered whole; callers consume the stream chunk by chunk.

use archive_pipeline_core::{StorageBackend, StorageLocation};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

use crate::error::{ServiceError, ServiceResult};

/// Stream of blob content chunks
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Opens blob content for streaming
#[async_trait]
pub trait BlobReader: Send + Sync {
    /// Open the byte stream at `location`
    ///
    /// # Returns
    /// * `Ok(ByteStream)` - The content stream
    /// * `Err(ServiceError::Storage)` - If the storage backend is unreachable or the object is missing
    async fn open(&self, location: &StorageLocation) -> ServiceResult<ByteStream>;
}

/// Reader handling both filesystem and HTTP object storage
#[derive(Debug, Clone)]
pub struct DefaultBlobReader {
    http: reqwest::Client,
}

impl DefaultBlobReader {
    /// Create a reader with the given HTTP request timeout
    pub fn new(timeout: Duration) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Create a reader sharing an existing HTTP client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn open_file(&self, base_path: &str, path: &str) -> ServiceResult<ByteStream> {
        let full_path = resolve_path(base_path, path)?;
        debug!(path = %full_path.display(), "Opening blob file");

        let file = tokio::fs::File::open(&full_path)
            .await
            .map_err(|e| ServiceError::Storage(format!("{}: {}", full_path.display(), e)))?;

        Ok(ReaderStream::new(file).boxed())
    }

    async fn open_http(&self, location: &StorageLocation) -> ServiceResult<ByteStream> {
        let url = location.http_url()?;
        debug!(url = %url, "Requesting blob over HTTP");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ServiceError::Storage(format!("GET {} failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| ServiceError::Storage(format!("GET {} failed: {}", url, e)))?;

        Ok(response
            .bytes_stream()
            .map_err(io::Error::other)
            .boxed())
    }
}

#[async_trait]
impl BlobReader for DefaultBlobReader {
    #[instrument(skip(self), fields(location = %location, backend = location.backend.backend_type()))]
    async fn open(&self, location: &StorageLocation) -> ServiceResult<ByteStream> {
        match &location.backend {
            StorageBackend::FileSystem { base_path } => {
                self.open_file(base_path, &location.path).await
            }
            StorageBackend::Http { .. } => self.open_http(location).await,
        }
    }
}

/// Join `path` under `base_path`, refusing anything that escapes the base
fn resolve_path(base_path: &str, path: &str) -> ServiceResult<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ServiceError::InvalidInput(format!(
            "Blob path escapes storage root: {}",
            path
        )));
    }
    Ok(Path::new(base_path).join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_resolve_path_rejects_traversal() {
        assert!(resolve_path("/data", "../etc/passwd").is_err());
        assert_eq!(
            resolve_path("/data", "/blobs/a").unwrap(),
            PathBuf::from("/data/blobs/a")
        );
    }

    #[tokio::test]
    async fn test_read_filesystem_blob() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("blobs")).await.unwrap();
        tokio::fs::write(dir.path().join("blobs/abc"), b"hello blob")
            .await
            .unwrap();

        let reader = DefaultBlobReader::new(Duration::from_secs(5)).unwrap();
        let location =
            StorageLocation::file_system(dir.path().to_string_lossy().to_string(), "blobs/abc")
                .unwrap();

        let stream = reader.open(&location).await.unwrap();
        assert_eq!(collect(stream).await, b"hello blob");
    }

    #[tokio::test]
    async fn test_missing_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let reader = DefaultBlobReader::new(Duration::from_secs(5)).unwrap();
        let location =
            StorageLocation::file_system(dir.path().to_string_lossy().to_string(), "nope").unwrap();

        let err = reader.open(&location).await.err().unwrap();
        assert!(matches!(err, ServiceError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_read_http_blob() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket/blobs/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote bytes".to_vec()))
            .mount(&server)
            .await;

        let reader = DefaultBlobReader::new(Duration::from_secs(5)).unwrap();
        let location =
            StorageLocation::http(format!("{}/bucket", server.uri()), "blobs/abc").unwrap();

        let stream = reader.open(&location).await.unwrap();
        assert_eq!(collect(stream).await, b"remote bytes");
    }

    #[tokio::test]
    async fn test_http_error_status_is_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let reader = DefaultBlobReader::new(Duration::from_secs(5)).unwrap();
        let location = StorageLocation::http(server.uri(), "blobs/abc").unwrap();

        let err = reader.open(&location).await.err().unwrap();
        assert!(matches!(err, ServiceError::Storage(_)));
    }
}
