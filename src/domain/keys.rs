//! Key material and participant types.
//!
//! - `KeyMaterial`: the single agent's signing key, supplied externally
//! - `ParticipantSet`: ordered on-chain addresses of all deployed agents

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Private key for the single-agent provisioning stage.
///
/// Debug and Display never reveal the key; use `fingerprint()` when a
/// stable identifier is needed in logs or the journal.
#[derive(Clone)]
pub struct KeyMaterial(String);

impl KeyMaterial {
    /// Wrap raw key text, trimming surrounding whitespace and newlines
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exposes the secret. Only the key file writer should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First 16 hex chars of the SHA-256 of the key
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<redacted {}>)", self.fingerprint())
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Ordered participant addresses, in key generation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantSet(Vec<String>);

impl ParticipantSet {
    pub(crate) fn from_addresses(addresses: Vec<String>) -> Self {
        Self(addresses)
    }

    pub fn addresses(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON array, the form deploy-build expects in its environment
    pub fn to_env_value(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}
