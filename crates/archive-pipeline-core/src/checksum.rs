//! Content checksums for stored blobs
//!
//! A blob's checksum is computed once by the pipeline and embedded into the
//! publish view of every asset that references the blob.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// Supported content hashing algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HashAlgorithm {
    /// SHA-256
    SHA256,
}

impl HashAlgorithm {
    /// Get the expected length of the hash in bytes
    pub fn hash_length(&self) -> usize {
        match self {
            HashAlgorithm::SHA256 => 32,
        }
    }

    /// Get the expected length of the hash in hexadecimal characters
    pub fn hex_length(&self) -> usize {
        self.hash_length() * 2
    }

    /// Key under which this digest appears in rendered metadata
    pub fn digest_key(&self) -> &'static str {
        match self {
            HashAlgorithm::SHA256 => "dandi:sha2-256",
        }
    }

    /// Validate that a hash string has the correct length for this algorithm
    pub fn validate_hash_format(&self, hash: &str) -> Result<()> {
        let expected_len = self.hex_length();
        let actual_len = hash.len();

        if actual_len != expected_len {
            return Err(PipelineError::ValidationError(format!(
                "Invalid hash length for {}: expected {} characters, got {}",
                self, expected_len, actual_len
            )));
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PipelineError::ValidationError(
                "Invalid hash format: must be hexadecimal string".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::SHA256 => write!(f, "SHA256"),
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::SHA256
    }
}

impl FromStr for HashAlgorithm {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "SHA256" | "SHA2-256" => Ok(HashAlgorithm::SHA256),
            _ => Err(PipelineError::ValidationError(format!(
                "Invalid hash algorithm: {}",
                s
            ))),
        }
    }
}

/// Checksum of a blob's full content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// The hashing algorithm used
    pub algorithm: HashAlgorithm,
    /// The hash value as a lowercase hexadecimal string
    pub value: String,
}

impl Checksum {
    /// Create a new checksum with validation
    ///
    /// # Errors
    /// Returns an error if the hash value format is invalid for the algorithm
    pub fn new(algorithm: HashAlgorithm, value: String) -> Result<Self> {
        let normalized_value = value.to_lowercase();
        algorithm.validate_hash_format(&normalized_value)?;

        Ok(Self {
            algorithm,
            value: normalized_value,
        })
    }

    /// Shorthand for a SHA-256 checksum
    pub fn sha256(value: impl Into<String>) -> Result<Self> {
        Self::new(HashAlgorithm::SHA256, value.into())
    }

    /// Returns true if both the algorithm and value match exactly
    pub fn verify(&self, other: &Checksum) -> bool {
        self.algorithm == other.algorithm && self.value == other.value
    }

    /// Get a reference to the hash value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Get the algorithm used
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_hash_algorithm_lengths() {
        assert_eq!(HashAlgorithm::SHA256.hash_length(), 32);
        assert_eq!(HashAlgorithm::SHA256.hex_length(), 64);
    }

    #[test]
    fn test_hash_algorithm_validation() {
        let valid_sha256 = "a".repeat(64);
        assert!(HashAlgorithm::SHA256.validate_hash_format(&valid_sha256).is_ok());

        let invalid_length = "a".repeat(63);
        assert!(HashAlgorithm::SHA256.validate_hash_format(&invalid_length).is_err());

        let invalid_chars = "g".repeat(64);
        assert!(HashAlgorithm::SHA256.validate_hash_format(&invalid_chars).is_err());
    }

    #[test]
    fn test_checksum_normalization() {
        let checksum = Checksum::sha256(EMPTY_SHA256.to_uppercase()).unwrap();
        assert_eq!(checksum.value, EMPTY_SHA256);
    }

    #[test]
    fn test_checksum_verification() {
        let a = Checksum::sha256(EMPTY_SHA256).unwrap();
        let b = Checksum::sha256(EMPTY_SHA256).unwrap();
        assert!(a.verify(&b));
        assert!(!a.verify(&Checksum::sha256("b".repeat(64)).unwrap()));
    }

    #[test]
    fn test_checksum_invalid() {
        assert!(Checksum::sha256("not_a_valid_hash").is_err());
    }

    #[test]
    fn test_checksum_display_and_digest_key() {
        let checksum = Checksum::sha256(EMPTY_SHA256).unwrap();
        assert_eq!(checksum.to_string(), format!("SHA256:{}", EMPTY_SHA256));
        assert_eq!(checksum.algorithm().digest_key(), "dandi:sha2-256");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("sha2-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::SHA256);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
