//! Metadata schema binding
//!
//! Rendered documents are checked in three stages:
//!
//! 1. **Version gate**: `schemaVersion` must be one of the allowed versions,
//!    otherwise the document fails as a whole ([`SchemaViolation::Value`]).
//! 2. **JSON Schema**: the bundled `PublishedAsset`/`PublishedDandiset`
//!    schemas, one schema-shaped error per violated constraint.
//! 3. **Model checks**: cross-field rules JSON Schema does not express,
//!    reported as model-shaped errors. Only run when stage 2 passed, so each
//!    violated constraint yields exactly one record.

use jsonschema::error::ValidationErrorKind;
use semver::Version as SemVer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};
use crate::normalize::{PathSegment, RawValidationError, SchemaValidationFailure, SchemaViolation};

const PUBLISHED_ASSET_SCHEMA: &str = include_str!("../schemas/published-asset.json");
const PUBLISHED_DANDISET_SCHEMA: &str = include_str!("../schemas/published-dandiset.json");

/// Version of the bundled schemas; `config/default.toml` ships the same value
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

/// Role a contributor needs for a dandiset to be publishable
pub const CONTACT_PERSON_ROLE: &str = "dcite:ContactPerson";

/// Which published schema a document is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaKey {
    /// Publish view of an asset
    PublishedAsset,
    /// Publish view of a dataset version
    PublishedDandiset,
}

impl SchemaKey {
    /// File name of the schema inside a schema directory
    pub fn file_name(&self) -> &'static str {
        match self {
            SchemaKey::PublishedAsset => "published-asset.json",
            SchemaKey::PublishedDandiset => "published-dandiset.json",
        }
    }

    fn bundled(&self) -> &'static str {
        match self {
            SchemaKey::PublishedAsset => PUBLISHED_ASSET_SCHEMA,
            SchemaKey::PublishedDandiset => PUBLISHED_DANDISET_SCHEMA,
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKey::PublishedAsset => write!(f, "PublishedAsset"),
            SchemaKey::PublishedDandiset => write!(f, "PublishedDandiset"),
        }
    }
}

/// Validates rendered metadata documents
pub trait MetadataValidator: Send + Sync {
    /// Validate `document` against the schema for `key`
    ///
    /// # Returns
    /// * `Ok(())` - The document is valid
    /// * `Err(SchemaViolation)` - Why it is not; never an infrastructure error
    fn validate(&self, document: &Value, key: SchemaKey) -> Result<(), SchemaViolation>;
}

/// Schema validator configuration
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    /// Version stamped on freshly rendered documents
    pub current_version: String,
    /// Versions accepted by the gate
    pub allowed_versions: Vec<String>,
    /// Directory overriding the bundled schema files
    pub schema_dir: Option<PathBuf>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            current_version: DEFAULT_SCHEMA_VERSION.to_string(),
            allowed_versions: vec![DEFAULT_SCHEMA_VERSION.to_string()],
            schema_dir: None,
        }
    }
}

impl SchemaConfig {
    /// Configuration accepting only `version`
    pub fn for_version(version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            allowed_versions: vec![version.clone()],
            current_version: version,
            schema_dir: None,
        }
    }

    /// Load schemas from a directory instead of the bundled copies
    pub fn with_schema_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_dir = Some(dir.into());
        self
    }
}

/// [`MetadataValidator`] backed by the `jsonschema` crate
pub struct JsonSchemaValidator {
    asset: jsonschema::Validator,
    dandiset: jsonschema::Validator,
    allowed: Vec<SemVer>,
    allowed_display: String,
}

impl JsonSchemaValidator {
    /// Compile both schemas
    ///
    /// # Errors
    /// Returns `ServiceError::Schema` if a schema cannot be read or compiled,
    /// or `ServiceError::Configuration` if an allowed version is not semver.
    pub fn new(config: &SchemaConfig) -> ServiceResult<Self> {
        let allowed = config
            .allowed_versions
            .iter()
            .map(|v| {
                SemVer::parse(v).map_err(|e| {
                    ServiceError::Configuration(format!("Invalid allowed schema version {}: {}", v, e))
                })
            })
            .collect::<ServiceResult<Vec<_>>>()?;

        if allowed.is_empty() {
            return Err(ServiceError::Configuration(
                "At least one allowed schema version is required".to_string(),
            ));
        }

        let asset = compile(SchemaKey::PublishedAsset, config.schema_dir.as_deref())?;
        let dandiset = compile(SchemaKey::PublishedDandiset, config.schema_dir.as_deref())?;

        info!(allowed = ?config.allowed_versions, "Metadata schemas compiled");

        Ok(Self {
            asset,
            dandiset,
            allowed_display: config.allowed_versions.join(", "),
            allowed,
        })
    }

    fn check_version(&self, document: &Value) -> Result<(), SchemaViolation> {
        let raw = match document.get("schemaVersion").and_then(Value::as_str) {
            Some(v) => v,
            None => {
                return Err(SchemaViolation::Value(
                    "Metadata is missing a schemaVersion.".to_string(),
                ))
            }
        };

        let accepted = SemVer::parse(raw)
            .map(|v| self.allowed.contains(&v))
            .unwrap_or(false);

        if accepted {
            Ok(())
        } else {
            Err(SchemaViolation::Value(format!(
                "Metadata version {} is not allowed. Allowed are: {}.",
                raw, self.allowed_display
            )))
        }
    }

    fn check_schema(&self, document: &Value, key: SchemaKey) -> Vec<RawValidationError> {
        let validator = match key {
            SchemaKey::PublishedAsset => &self.asset,
            SchemaKey::PublishedDandiset => &self.dandiset,
        };

        validator
            .iter_errors(document)
            .map(|error| {
                let mut path = parse_pointer(&error.instance_path.to_string());
                if let ValidationErrorKind::Required { property } = &error.kind {
                    if let Some(name) = property.as_str() {
                        path.push(PathSegment::Key(name.to_string()));
                    }
                }
                RawValidationError::schema(path, error.to_string())
            })
            .collect()
    }
}

impl MetadataValidator for JsonSchemaValidator {
    fn validate(&self, document: &Value, key: SchemaKey) -> Result<(), SchemaViolation> {
        self.check_version(document)?;

        let mut errors = self.check_schema(document, key);
        if errors.is_empty() {
            errors = model_checks(document, key);
        }

        debug!(schema = %key, errors = errors.len(), "Metadata validated");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolation::Structured(SchemaValidationFailure::new(errors)))
        }
    }
}

fn compile(key: SchemaKey, schema_dir: Option<&Path>) -> ServiceResult<jsonschema::Validator> {
    let source = match schema_dir {
        Some(dir) => {
            let path = dir.join(key.file_name());
            std::fs::read_to_string(&path)
                .map_err(|e| ServiceError::Schema(format!("{}: {}", path.display(), e)))?
        }
        None => key.bundled().to_string(),
    };

    let schema: Value = serde_json::from_str(&source)
        .map_err(|e| ServiceError::Schema(format!("{} is not valid JSON: {}", key, e)))?;

    jsonschema::options()
        .should_validate_formats(true)
        .build(&schema)
        .map_err(|e| ServiceError::Schema(format!("{} failed to compile: {}", key, e)))
}

/// Split a JSON pointer (`/contributor/0/name`) into path segments
fn parse_pointer(pointer: &str) -> Vec<PathSegment> {
    pointer
        .split('/')
        .skip(1)
        .map(|raw| {
            let token = raw.replace("~1", "/").replace("~0", "~");
            match token.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(token),
            }
        })
        .collect()
}

fn model_checks(document: &Value, key: SchemaKey) -> Vec<RawValidationError> {
    let mut errors = Vec::new();

    match key {
        SchemaKey::PublishedAsset => {
            let has_sha256 = document
                .get("digest")
                .and_then(|d| d.get("dandi:sha2-256"))
                .is_some();
            if !has_sha256 {
                errors.push(RawValidationError::model(
                    "digest",
                    "A published asset must have a dandi:sha2-256 digest",
                ));
            }
        }
        SchemaKey::PublishedDandiset => {
            let has_contact = document
                .get("contributor")
                .and_then(Value::as_array)
                .map(|contributors| contributors.iter().any(is_contact_person))
                .unwrap_or(false);
            if !has_contact {
                errors.push(RawValidationError::model(
                    "contributor",
                    "At least one contributor must have the role dcite:ContactPerson",
                ));
            }
        }
    }

    errors
}

fn is_contact_person(contributor: &Value) -> bool {
    contributor
        .get("roleName")
        .and_then(Value::as_array)
        .map(|roles| roles.iter().any(|r| r.as_str() == Some(CONTACT_PERSON_ROLE)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> JsonSchemaValidator {
        JsonSchemaValidator::new(&SchemaConfig::for_version("1.0.0")).unwrap()
    }

    fn publish_activity() -> Value {
        json!({
            "id": "urn:uuid:3c1bd6b3-6f38-4a8e-9a3c-8d2bdf0e1d55",
            "name": "DANDI publish",
            "startDate": "2026-10-16T12:00:00Z",
            "endDate": "2026-10-16T12:00:00Z",
            "schemaKey": "PublishActivity"
        })
    }

    fn dandiset() -> Value {
        json!({
            "id": "DANDI:000001/0.261016.1200",
            "identifier": "DANDI:000001",
            "name": "Test Dandiset",
            "description": "A dandiset used in tests",
            "contributor": [{
                "name": "Doe, Jane",
                "email": "jane@example.org",
                "roleName": ["dcite:ContactPerson"],
                "schemaKey": "Person"
            }],
            "license": ["spdx:CC0-1.0"],
            "version": "0.261016.1200",
            "url": "https://dandiarchive.org/dandiset/000001/0.261016.1200",
            "doi": "10.80507/dandi.123456/0.123456.1234",
            "assetsSummary": {"numberOfBytes": 20, "numberOfFiles": 1, "schemaKey": "AssetsSummary"},
            "schemaKey": "Dandiset",
            "schemaVersion": "1.0.0",
            "datePublished": "2026-10-16T12:00:00Z",
            "publishedBy": publish_activity()
        })
    }

    fn asset() -> Value {
        json!({
            "id": "dandiasset:01HXYZ",
            "identifier": "01HXYZ",
            "path": "foo/bar.txt",
            "contentSize": 20,
            "digest": {
                "dandi:dandi-etag": "76d36e98f312e98ff908c8c82c8dd623-0",
                "dandi:sha2-256": "a".repeat(64)
            },
            "contentUrl": ["https://storage.example.org/blobs/abc"],
            "encodingFormat": "text/plain",
            "schemaKey": "Asset",
            "schemaVersion": "1.0.0",
            "datePublished": "2026-10-16T12:00:00Z",
            "publishedBy": publish_activity()
        })
    }

    fn structured(result: Result<(), SchemaViolation>) -> Vec<RawValidationError> {
        match result {
            Err(SchemaViolation::Structured(failure)) => failure.errors,
            other => panic!("expected structured failure, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_documents() {
        let validator = validator();
        assert!(validator.validate(&dandiset(), SchemaKey::PublishedDandiset).is_ok());
        assert!(validator.validate(&asset(), SchemaKey::PublishedAsset).is_ok());
    }

    #[test]
    fn test_default_config_accepts_bundled_fixtures() {
        let config = SchemaConfig::default();
        assert_eq!(config.allowed_versions, vec![DEFAULT_SCHEMA_VERSION.to_string()]);

        let validator = JsonSchemaValidator::new(&config).unwrap();
        assert_eq!(asset()["schemaVersion"], json!(DEFAULT_SCHEMA_VERSION));
        assert!(validator.validate(&dandiset(), SchemaKey::PublishedDandiset).is_ok());
        assert!(validator.validate(&asset(), SchemaKey::PublishedAsset).is_ok());
    }

    #[test]
    fn test_disallowed_version_is_value_failure() {
        let mut doc = dandiset();
        doc["schemaVersion"] = json!("0.9.9");
        assert_eq!(
            validator().validate(&doc, SchemaKey::PublishedDandiset),
            Err(SchemaViolation::Value(
                "Metadata version 0.9.9 is not allowed. Allowed are: 1.0.0.".to_string()
            ))
        );
    }

    #[test]
    fn test_missing_version_is_value_failure() {
        let mut doc = asset();
        doc.as_object_mut().unwrap().remove("schemaVersion");
        assert!(matches!(
            validator().validate(&doc, SchemaKey::PublishedAsset),
            Err(SchemaViolation::Value(_))
        ));
    }

    #[test]
    fn test_missing_description_reports_field() {
        let mut doc = dandiset();
        doc.as_object_mut().unwrap().remove("description");

        let errors = structured(validator().validate(&doc, SchemaKey::PublishedDandiset));
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            RawValidationError::Schema { path, message } => {
                assert_eq!(path, &vec![PathSegment::Key("description".to_string())]);
                assert!(message.contains("description"));
            }
            other => panic!("unexpected error shape: {:?}", other),
        }
    }

    #[test]
    fn test_each_violation_reported_once_in_order() {
        let mut doc = dandiset();
        doc["name"] = json!("");
        doc["contributor"][0]["email"] = json!("not an email");
        doc["assetsSummary"]["numberOfFiles"] = json!(-1);

        let errors = structured(validator().validate(&doc, SchemaKey::PublishedDandiset));
        assert_eq!(errors.len(), 3);
        for error in &errors {
            assert!(matches!(error, RawValidationError::Schema { path, .. } if !path.is_empty()));
        }
    }

    #[test]
    fn test_asset_without_sha256_fails_model_check() {
        let mut doc = asset();
        doc["digest"].as_object_mut().unwrap().remove("dandi:sha2-256");

        let errors = structured(validator().validate(&doc, SchemaKey::PublishedAsset));
        assert_eq!(
            errors,
            vec![RawValidationError::model(
                "digest",
                "A published asset must have a dandi:sha2-256 digest"
            )]
        );
    }

    #[test]
    fn test_dandiset_without_contact_person() {
        let mut doc = dandiset();
        doc["contributor"][0]["roleName"] = json!(["dcite:Author"]);

        let errors = structured(validator().validate(&doc, SchemaKey::PublishedDandiset));
        assert!(matches!(
            &errors[..],
            [RawValidationError::Model { loc, .. }] if loc == &vec!["contributor".to_string()]
        ));
    }

    #[test]
    fn test_parse_pointer() {
        assert!(parse_pointer("").is_empty());
        assert_eq!(
            parse_pointer("/contributor/0/a~1b"),
            vec![
                PathSegment::Key("contributor".to_string()),
                PathSegment::Index(0),
                PathSegment::Key("a/b".to_string()),
            ]
        );
    }

    #[test]
    fn test_schema_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        for key in [SchemaKey::PublishedAsset, SchemaKey::PublishedDandiset] {
            std::fs::write(dir.path().join(key.file_name()), r#"{"type": "object"}"#).unwrap();
        }

        let config = SchemaConfig::for_version("1.0.0").with_schema_dir(dir.path());
        let validator = JsonSchemaValidator::new(&config).unwrap();

        // Permissive schema, but model checks still apply
        let doc = json!({"schemaVersion": "1.0.0", "digest": {"dandi:sha2-256": "x"}});
        assert!(validator.validate(&doc, SchemaKey::PublishedAsset).is_ok());
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(JsonSchemaValidator::new(&SchemaConfig::for_version("latest")).is_err());

        let dir = tempfile::tempdir().unwrap();
        let config = SchemaConfig::for_version("1.0.0").with_schema_dir(dir.path());
        assert!(matches!(
            JsonSchemaValidator::new(&config),
            Err(ServiceError::Schema(_))
        ));
    }
}
