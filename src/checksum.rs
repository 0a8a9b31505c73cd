//! Fingerprints of resolved import values
//!
//! A fingerprint is the SHA256 of the canonical JSON encoding of a value. It is
//! stored as the `configGeneration` of an import status entry so later passes
//! can tell whether the consumed value changed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 fingerprint of a resolved value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute fingerprint from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute fingerprint from a JSON value
    ///
    /// Object keys are ordered, so equal values always share a fingerprint.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let canonical = serde_json::to_string(value).unwrap_or_default();
        Self::from_bytes(canonical.as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that a JSON value matches this fingerprint
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        *self == Self::from_json(value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
