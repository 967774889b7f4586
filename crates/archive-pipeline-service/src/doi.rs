//! DOI deletion
//!
//! Draft DOIs are registered with DataCite when a dandiset is created and
//! must be removed when it is deleted. Deletion is fire-and-forget: it never
//! feeds back into validation.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::{ServiceError, ServiceResult};

/// Default DataCite REST endpoint
pub const DEFAULT_DATACITE_API_URL: &str = "https://api.datacite.org";

/// Removes externally registered identifiers
#[async_trait]
pub trait DoiClient: Send + Sync {
    /// Delete `doi`; deleting an unknown DOI succeeds
    async fn delete(&self, doi: &str) -> ServiceResult<()>;
}

/// DataCite client configuration
#[derive(Debug, Clone)]
pub struct DataCiteConfig {
    /// API base URL
    pub api_url: String,
    /// Repository account
    pub username: String,
    /// Repository password
    pub password: String,
    /// Request timeout
    pub timeout: Duration,
}

/// [`DoiClient`] talking to the DataCite REST API
#[derive(Debug, Clone)]
pub struct DataCiteClient {
    http: reqwest::Client,
    config: DataCiteConfig,
}

impl DataCiteClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` if the HTTP client cannot be built
    pub fn new(config: DataCiteConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn doi_url(&self, doi: &str) -> String {
        format!("{}/dois/{}", self.config.api_url.trim_end_matches('/'), doi)
    }
}

#[async_trait]
impl DoiClient for DataCiteClient {
    #[instrument(skip(self))]
    async fn delete(&self, doi: &str) -> ServiceResult<()> {
        let response = self
            .http
            .delete(self.doi_url(doi))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("DOI already absent");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Remote(format!(
                "DataCite DELETE {} returned {}: {}",
                doi, status, body
            )));
        }

        info!("DOI deleted");
        Ok(())
    }
}

/// Client used when DOI management is turned off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledDoiClient;

#[async_trait]
impl DoiClient for DisabledDoiClient {
    async fn delete(&self, doi: &str) -> ServiceResult<()> {
        debug!(doi, "DOI management disabled, skipping delete");
        Ok(())
    }
}
