//! Participant-set derivation from a generated keys file.
//!
//! The keys file is a JSON array of records, each carrying at least an
//! `address`. Other fields (private keys included) are ignored and never
//! copied anywhere.

use std::path::Path;

use serde_json::Value;

use crate::domain::ParticipantSet;
use crate::error::{SequencerError, StageResult};

/// Read `path` and extract addresses in generation order.
///
/// Fails when the file is unreadable, is not an array, is empty, has a
/// record without a non-empty string `address`, or does not hold exactly
/// `expected` records.
pub async fn derive_participants(path: &Path, expected: usize) -> StageResult<ParticipantSet> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SequencerError::io("Failed to read generated keys file", path, e))?;

    parse_participants(&content, path, expected)
}

/// Parse keys file content; `path` is only used in error messages
pub fn parse_participants(
    content: &str,
    path: &Path,
    expected: usize,
) -> StageResult<ParticipantSet> {
    let malformed = |reason: String| SequencerError::MalformedParticipants {
        path: path.to_path_buf(),
        reason,
    };

    let document: Value =
        serde_json::from_str(content).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

    let records = document
        .as_array()
        .ok_or_else(|| malformed("expected a JSON array of key records".to_string()))?;

    if records.is_empty() {
        return Err(malformed("no key records".to_string()));
    }

    let mut addresses = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let address = record
            .get("address")
            .ok_or_else(|| malformed(format!("record {} has no 'address' field", i)))?
            .as_str()
            .ok_or_else(|| malformed(format!("record {} has a non-string 'address'", i)))?
            .trim();

        if address.is_empty() {
            return Err(malformed(format!("record {} has an empty 'address'", i)));
        }

        addresses.push(address.to_string());
    }

    if addresses.len() != expected {
        return Err(malformed(format!(
            "expected {} key records, found {}",
            expected,
            addresses.len()
        )));
    }

    Ok(ParticipantSet::from_addresses(addresses))
}
