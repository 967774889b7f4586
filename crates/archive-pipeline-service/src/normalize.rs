//! Validation error normalization
//!
//! Validators report failures in two shapes: model-shaped errors carry a
//! `loc` key sequence, schema-shaped errors carry a structured instance path.
//! Both are flattened into [`ValidationErrorRecord`]s, preserving order. No
//! record is ever reordered, merged or dropped.

use archive_pipeline_core::{ValidationErrorRecord, ValidationOutcome};
use std::fmt;

/// One segment of a schema instance path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object property
    Key(String),
    /// Array index
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// A single error as reported by a validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValidationError {
    /// Model-shaped: field location as a key sequence
    Model { loc: Vec<String>, msg: String },
    /// Schema-shaped: structured instance path
    Schema {
        path: Vec<PathSegment>,
        message: String,
    },
}

impl RawValidationError {
    /// Model-shaped error for one top-level field
    pub fn model(field: impl Into<String>, msg: impl Into<String>) -> Self {
        RawValidationError::Model {
            loc: vec![field.into()],
            msg: msg.into(),
        }
    }

    /// Schema-shaped error
    pub fn schema(path: Vec<PathSegment>, message: impl Into<String>) -> Self {
        RawValidationError::Schema {
            path,
            message: message.into(),
        }
    }
}

/// A structured validation failure: one or more field-level errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaValidationFailure {
    /// Errors in validator order
    pub errors: Vec<RawValidationError>,
}

impl SchemaValidationFailure {
    /// Wrap a list of errors
    pub fn new(errors: Vec<RawValidationError>) -> Self {
        Self { errors }
    }
}

/// Why a document failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    /// Field-level errors
    Structured(SchemaValidationFailure),
    /// The document as a whole was rejected (e.g. unsupported schema version)
    Value(String),
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaViolation::Structured(failure) => {
                write!(f, "{} validation error(s)", failure.errors.len())
            }
            SchemaViolation::Value(message) => f.write_str(message),
        }
    }
}

/// Normalize one raw error
pub fn normalize_error(error: &RawValidationError) -> ValidationErrorRecord {
    match error {
        RawValidationError::Model { loc, msg } => {
            let field = loc.first().cloned().unwrap_or_default();
            ValidationErrorRecord::new(field, msg.clone())
        }
        RawValidationError::Schema { path, message } => {
            let field = path
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            ValidationErrorRecord::new(field, message.clone())
        }
    }
}

/// Normalize every error of a structured failure, in order
pub fn normalize(failure: &SchemaValidationFailure) -> Vec<ValidationErrorRecord> {
    failure.errors.iter().map(normalize_error).collect()
}

/// Map a validator result onto the outcome to persist
///
/// A value-level failure becomes exactly one record with an empty field.
pub fn outcome_from_result(result: Result<(), SchemaViolation>) -> ValidationOutcome {
    match result {
        Ok(()) => ValidationOutcome::Valid,
        Err(SchemaViolation::Structured(failure)) => ValidationOutcome::Invalid(normalize(&failure)),
        Err(SchemaViolation::Value(message)) => {
            ValidationOutcome::Invalid(vec![ValidationErrorRecord::document(message)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_uses_leading_key() {
        let error = RawValidationError::Model {
            loc: vec!["contributor".to_string(), "0".to_string()],
            msg: "missing contact".to_string(),
        };
        assert_eq!(
            normalize_error(&error),
            ValidationErrorRecord::new("contributor", "missing contact")
        );
    }

    #[test]
    fn test_schema_error_joins_path() {
        let error = RawValidationError::schema(
            vec!["contributor".into(), 0.into(), "name".into()],
            "'name' is a required property",
        );
        assert_eq!(normalize_error(&error).field, "contributor.0.name");
    }

    #[test]
    fn test_root_schema_error_has_empty_field() {
        let error = RawValidationError::schema(vec![], "not an object");
        assert_eq!(normalize_error(&error).field, "");
    }

    #[test]
    fn test_order_and_duplicates_preserved() {
        let failure = SchemaValidationFailure::new(vec![
            RawValidationError::schema(vec!["b".into()], "second"),
            RawValidationError::model("a", "first"),
            RawValidationError::schema(vec!["b".into()], "second"),
        ]);
        let records = normalize(&failure);
        let fields: Vec<&str> = records.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(fields, vec!["b", "a", "b"]);
    }

    #[test]
    fn test_value_failure_outcome() {
        let outcome = outcome_from_result(Err(SchemaViolation::Value(
            "Metadata version 0.9.9 is not allowed.".to_string(),
        )));
        assert_eq!(
            outcome,
            ValidationOutcome::Invalid(vec![ValidationErrorRecord::new(
                "",
                "Metadata version 0.9.9 is not allowed."
            )])
        );
    }

    #[test]
    fn test_valid_outcome() {
        assert_eq!(outcome_from_result(Ok(())), ValidationOutcome::Valid);
    }
}
