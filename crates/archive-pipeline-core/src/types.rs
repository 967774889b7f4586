//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Create the identifier from a ULID
            pub fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Get the underlying ULID
            pub fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Parse from string
            pub fn from_string(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| PipelineError::InvalidIdentifier(format!("{}: {}", $label, e)))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_string(s)
            }
        }
    };
}

ulid_id!(
    /// Asset identifier using ULID (Universally Unique Lexicographically Sortable Identifier)
    AssetId,
    "AssetId"
);

ulid_id!(
    /// Dataset version identifier
    VersionId,
    "VersionId"
);

/// Blob identifier, assigned by the upload subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    /// Generate a new random BlobId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlobId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| PipelineError::InvalidIdentifier(format!("BlobId: {}", e)))
    }
}

/// Six-digit public dataset identifier (e.g. `000123`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DandisetId(u32);

impl DandisetId {
    /// Largest identifier that still fits in six digits
    pub const MAX: u32 = 999_999;

    /// Create a dataset identifier, rejecting values wider than six digits
    pub fn new(id: u32) -> Result<Self> {
        if id > Self::MAX {
            return Err(PipelineError::InvalidIdentifier(format!(
                "Dandiset identifier {} exceeds six digits",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Numeric value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DandisetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl FromStr for DandisetId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let id = s
            .parse::<u32>()
            .map_err(|e| PipelineError::InvalidIdentifier(format!("DandisetId: {}", e)))?;
        Self::new(id)
    }
}

/// Metadata validation status shared by assets and versions
///
/// `PENDING → VALIDATING → {VALID, INVALID}`. Every validation run re-enters
/// `VALIDATING`, whatever the previous state was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    /// Created, never validated
    Pending,
    /// A validation run is in progress (or crashed mid-run)
    Validating,
    /// Last run found no errors
    Valid,
    /// Last run failed validation
    Invalid,
}

impl ValidationStatus {
    /// Whether this is an outcome of a completed validation run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }

    /// Check whether the state machine allows moving to `to`
    pub fn can_transition_to(&self, to: ValidationStatus) -> bool {
        match to {
            Self::Pending => false,
            Self::Validating => true,
            Self::Valid | Self::Invalid => *self == Self::Validating,
        }
    }

    /// Move to `to`, or fail if the state machine forbids it
    pub fn transition(self, to: ValidationStatus) -> Result<ValidationStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(PipelineError::InvalidStatusTransition { from: self, to })
        }
    }

    /// Stable string form used in storage and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
        }
    }
}

impl Default for ValidationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "VALIDATING" => Ok(Self::Validating),
            "VALID" => Ok(Self::Valid),
            "INVALID" => Ok(Self::Invalid),
            _ => Err(format!("Invalid validation status: {}", s)),
        }
    }
}

/// Generation of a validation run
///
/// Each entry into `VALIDATING` takes the next generation. Only the run that
/// holds the current generation may record a terminal outcome; results of
/// superseded runs are dropped.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ValidationRun(u64);

impl ValidationRun {
    /// Wrap a stored generation
    pub fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// Generation number
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The generation a new run takes
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ValidationRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One normalized validation violation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
    /// Dotted path of the offending field; empty for whole-document failures
    pub field: String,
    /// Human-readable message from the validator
    pub message: String,
}

impl ValidationErrorRecord {
    /// Create a record for a specific field
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a record that is not tied to any field
    pub fn document(message: impl Into<String>) -> Self {
        Self::new(String::new(), message)
    }
}

impl fmt::Display for ValidationErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Terminal result of one validation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The rendered document passed validation
    Valid,
    /// The rendered document failed with these records, in validator order
    Invalid(Vec<ValidationErrorRecord>),
}

impl ValidationOutcome {
    /// Status to persist for this outcome
    pub fn status(&self) -> ValidationStatus {
        match self {
            Self::Valid => ValidationStatus::Valid,
            Self::Invalid(_) => ValidationStatus::Invalid,
        }
    }

    /// Error records to persist for this outcome (empty when valid)
    pub fn errors(&self) -> &[ValidationErrorRecord] {
        match self {
            Self::Valid => &[],
            Self::Invalid(errors) => errors,
        }
    }

    /// Split into the persisted pair
    pub fn into_parts(self) -> (ValidationStatus, Vec<ValidationErrorRecord>) {
        match self {
            Self::Valid => (ValidationStatus::Valid, Vec::new()),
            Self::Invalid(errors) => (ValidationStatus::Invalid, errors),
        }
    }
}
