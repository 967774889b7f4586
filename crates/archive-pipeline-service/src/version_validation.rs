//! Version metadata validation
//!
//! Same state machine as asset validation, applied to a version's publish
//! view. DOIs are issued out-of-band at publish time, so a placeholder DOI is
//! injected before validation and the `doi` constraint cannot fail spuriously.

use archive_pipeline_core::{EventType, PipelineEvent, ValidationOutcome, VersionId};
use archive_pipeline_db::{EventPublisher, VersionRepository};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::normalize::outcome_from_result;
use crate::render::PublishRenderer;
use crate::schema::{MetadataValidator, SchemaKey};

/// DOI stand-in used while validating unpublished versions
pub const PLACEHOLDER_DOI: &str = "10.80507/dandi.123456/0.123456.1234";

/// Validates a version's publish view and records the outcome
pub struct VersionValidator {
    versions: Arc<dyn VersionRepository>,
    renderer: Arc<dyn PublishRenderer>,
    validator: Arc<dyn MetadataValidator>,
    events: Arc<dyn EventPublisher>,
}

impl VersionValidator {
    pub fn new(
        versions: Arc<dyn VersionRepository>,
        renderer: Arc<dyn PublishRenderer>,
        validator: Arc<dyn MetadataValidator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            versions,
            renderer,
            validator,
            events,
        }
    }

    /// Run one validation pass over a version
    ///
    /// Enters `VALIDATING` before reading, like asset validation; a superseded
    /// run's outcome is returned but not recorded.
    ///
    /// # Errors
    /// * `NotFound` if the version does not exist
    /// * `Database` if a read or write fails
    #[instrument(skip(self), fields(version_id = %version_id))]
    pub async fn validate(&self, version_id: &VersionId) -> ServiceResult<ValidationOutcome> {
        let run = self.versions.mark_validating(version_id).await?;

        let version = self
            .versions
            .find_by_id(version_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("version {}", version_id)))?;

        let summary = self.versions.asset_summary(version_id).await?;
        let mut document = self.renderer.render_version(&version, &summary, Utc::now());
        inject_placeholder_doi(&mut document);

        let outcome =
            outcome_from_result(self.validator.validate(&document, SchemaKey::PublishedDandiset));
        if !self.versions.record_validation(version_id, run, &outcome).await? {
            info!(run = %run, "Version validation superseded by a later run");
            return Ok(outcome);
        }

        info!(
            dandiset = %version.dandiset_id,
            version = %version.version,
            status = %outcome.status(),
            errors = outcome.errors().len(),
            "Version validation recorded"
        );

        let event = PipelineEvent::new(EventType::VersionValidated {
            version_id: *version_id,
            status: outcome.status(),
            error_count: outcome.errors().len(),
        });
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish version validation event");
        }

        Ok(outcome)
    }
}

fn inject_placeholder_doi(document: &mut Value) {
    if let Value::Object(map) = document {
        map.insert("doi".to_string(), Value::String(PLACEHOLDER_DOI.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::DefaultPublishRenderer;
    use crate::schema::{JsonSchemaValidator, SchemaConfig};
    use archive_pipeline_core::{DandisetId, ValidationErrorRecord, ValidationStatus, Version};
    use archive_pipeline_db::ChannelEventPublisher;
    use archive_pipeline_db::InMemoryRepository;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the documents it is asked to validate
    #[derive(Default)]
    struct RecordingValidator {
        seen: Mutex<Vec<Value>>,
    }

    impl MetadataValidator for RecordingValidator {
        fn validate(&self, document: &Value, _key: SchemaKey) -> Result<(), crate::SchemaViolation> {
            self.seen.lock().unwrap().push(document.clone());
            Ok(())
        }
    }

    fn dandiset_metadata() -> Value {
        json!({
            "schemaVersion": "1.0.0",
            "schemaKey": "Dandiset",
            "description": "An informative description",
            "license": ["spdx:CC0-1.0"],
            "contributor": [{
                "name": "Doe, Jane",
                "email": "jane@example.org",
                "roleName": ["dcite:ContactPerson"],
                "schemaKey": "Person"
            }]
        })
    }

    async fn seed(repo: &InMemoryRepository, metadata: Value) -> Version {
        let version = Version::draft(DandisetId::new(1).unwrap(), "Test Dandiset", metadata).unwrap();
        VersionRepository::insert(repo, version).await.unwrap()
    }

    fn service(repo: Arc<InMemoryRepository>, validator: Arc<dyn MetadataValidator>) -> VersionValidator {
        let (publisher, _events) = ChannelEventPublisher::channel(8);
        VersionValidator::new(
            repo,
            Arc::new(DefaultPublishRenderer::default()),
            validator,
            Arc::new(publisher),
        )
    }

    fn schema_validator() -> Arc<dyn MetadataValidator> {
        Arc::new(JsonSchemaValidator::new(&SchemaConfig::for_version("1.0.0")).unwrap())
    }

    async fn stored(repo: &InMemoryRepository, id: &VersionId) -> Version {
        VersionRepository::find_by_id(repo, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_valid_version() {
        let repo = Arc::new(InMemoryRepository::new());
        let version = seed(&repo, dandiset_metadata()).await;

        let outcome = service(repo.clone(), schema_validator())
            .validate(&version.id)
            .await
            .unwrap();
        assert_eq!(outcome, ValidationOutcome::Valid);

        let version = stored(&repo, &version.id).await;
        assert_eq!(version.status, ValidationStatus::Valid);
        assert!(version.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_doi_injected() {
        let repo = Arc::new(InMemoryRepository::new());
        let version = seed(&repo, dandiset_metadata()).await;
        let recorder = Arc::new(RecordingValidator::default());

        service(repo, recorder.clone()).validate(&version.id).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["doi"], json!(PLACEHOLDER_DOI));
    }

    #[tokio::test]
    async fn test_missing_description() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut metadata = dandiset_metadata();
        metadata.as_object_mut().unwrap().remove("description");
        let version = seed(&repo, metadata).await;

        service(repo.clone(), schema_validator())
            .validate(&version.id)
            .await
            .unwrap();

        let version = stored(&repo, &version.id).await;
        assert_eq!(version.status, ValidationStatus::Invalid);
        assert_eq!(version.validation_errors.len(), 1);
        assert_eq!(version.validation_errors[0].field, "description");
        assert!(!version.validation_errors[0].message.is_empty());
    }

    #[tokio::test]
    async fn test_schema_version_mismatch() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut metadata = dandiset_metadata();
        metadata["schemaVersion"] = json!("0.9.9");
        let version = seed(&repo, metadata).await;

        service(repo.clone(), schema_validator())
            .validate(&version.id)
            .await
            .unwrap();

        assert_eq!(
            stored(&repo, &version.id).await.validation_errors,
            vec![ValidationErrorRecord::new(
                "",
                "Metadata version 0.9.9 is not allowed. Allowed are: 1.0.0."
            )]
        );
    }

    #[tokio::test]
    async fn test_missing_version_is_not_found() {
        let repo = Arc::new(InMemoryRepository::new());
        let err = service(repo, schema_validator())
            .validate(&VersionId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
