//! Registry package identifiers.
//!
//! Packages and services are addressed as `namespace/name:version`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A namespaced, versioned package or service identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageId {
    /// Author namespace (e.g. `valory`)
    pub namespace: String,

    /// Package name, also the default local directory name
    pub name: String,

    /// Version string (e.g. `0.1.0`)
    pub version: String,
}

/// Reasons a package id string was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageIdError {
    #[error("Package id '{0}' must look like namespace/name:version")]
    Format(String),

    #[error("Package id '{id}' has an empty {part}")]
    EmptyPart { id: String, part: &'static str },

    #[error("Package id '{id}' contains invalid characters in {part}")]
    InvalidChars { id: String, part: &'static str },
}

impl PackageId {
    /// Create a package id from its parts, validating each of them
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, PackageIdError> {
        let id = Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        };
        id.validate()?;
        Ok(id)
    }

    fn validate(&self) -> Result<(), PackageIdError> {
        let display = self.to_string();
        for (part, value) in [
            ("namespace", &self.namespace),
            ("name", &self.name),
            ("version", &self.version),
        ] {
            if value.is_empty() {
                return Err(PackageIdError::EmptyPart { id: display, part });
            }
            let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
            if !value.chars().all(allowed) {
                return Err(PackageIdError::InvalidChars { id: display, part });
            }
        }

        // The name doubles as a directory name
        if self.name == "." || self.name == ".." {
            return Err(PackageIdError::InvalidChars {
                id: display,
                part: "name",
            });
        }

        Ok(())
    }
}

impl FromStr for PackageId {
    type Err = PackageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (namespace, rest) = s
            .split_once('/')
            .ok_or_else(|| PackageIdError::Format(s.to_string()))?;
        let (name, version) = rest
            .split_once(':')
            .ok_or_else(|| PackageIdError::Format(s.to_string()))?;

        Self::new(namespace, name, version)
    }
}

impl TryFrom<String> for PackageId {
    type Error = PackageIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PackageId> for String {
    fn from(id: PackageId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.version)
    }
}
