// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Chained SHA-256 hashing of phase records.
//!
//! Every completed phase is reduced to a [`PhaseRecord`] (prompt inputs and
//! responses in participant order). [`build`] folds the records left-to-right
//! into a chain where each entry commits to its predecessor, and [`verify`]
//! recomputes the chain and reports the first phase whose hash disagrees.
//!
//! Round-trip property: `verify(&build(P)?, P)` is valid for any non-empty `P`.

use crate::canonical::to_canonical_string;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The hashable reduction of one phase: who was asked what, and what came back.
///
/// `inputs` and `outputs` are kept in participant (roster) order so the
/// canonical encoding is deterministic given identical phase content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseRecord {
    /// Phase name, e.g. `"GATHER"`.
    pub phase: String,
    /// `(provider, prompt)` pairs in participant order.
    pub inputs: Vec<(String, String)>,
    /// `(provider, response)` pairs in participant order.
    pub outputs: Vec<(String, String)>,
    /// Identifier of the run or roster that produced the phase.
    pub provider_id: String,
    /// RFC 3339 timestamp of phase completion.
    pub timestamp: String,
}

/// One link in the chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HashChainEntry {
    pub phase: String,
    pub inputs_hash: String,
    pub outputs_hash: String,
    /// `None` for the first entry.
    pub previous_hash: Option<String>,
    pub hash: String,
    pub timestamp: String,
    pub provider_id: String,
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// Name of the first phase whose recomputed hash disagrees.
    pub broken_at: Option<String>,
    pub details: Option<String>,
}

impl ChainVerification {
    fn ok() -> Self {
        Self {
            valid: true,
            broken_at: None,
            details: None,
        }
    }

    fn broken(phase: &str, details: impl Into<String>) -> Self {
        Self {
            valid: false,
            broken_at: Some(phase.to_string()),
            details: Some(details.into()),
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash the canonical encoding of a list of `(name, text)` pairs.
fn hash_pairs(pairs: &[(String, String)]) -> Result<String> {
    Ok(sha256_hex(to_canonical_string(&pairs)?.as_bytes()))
}

/// Hash of the entry itself: `H(previous ‖ inputs ‖ outputs ‖ phase ‖ provider ‖ timestamp)`.
fn entry_hash(
    previous: Option<&str>,
    inputs_hash: &str,
    outputs_hash: &str,
    phase: &str,
    provider_id: &str,
    timestamp: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or("genesis").as_bytes());
    hasher.update(b"|");
    hasher.update(inputs_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(outputs_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(phase.as_bytes());
    hasher.update(b"|");
    hasher.update(provider_id.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the chain entries left-to-right.
pub fn build(phases: &[PhaseRecord]) -> Result<Vec<HashChainEntry>> {
    let mut entries = Vec::with_capacity(phases.len());
    let mut previous: Option<String> = None;

    for record in phases {
        let inputs_hash = hash_pairs(&record.inputs)?;
        let outputs_hash = hash_pairs(&record.outputs)?;
        let hash = entry_hash(
            previous.as_deref(),
            &inputs_hash,
            &outputs_hash,
            &record.phase,
            &record.provider_id,
            &record.timestamp,
        );
        entries.push(HashChainEntry {
            phase: record.phase.clone(),
            inputs_hash,
            outputs_hash,
            previous_hash: previous.clone(),
            hash: hash.clone(),
            timestamp: record.timestamp.clone(),
            provider_id: record.provider_id.clone(),
        });
        previous = Some(hash);
    }
    Ok(entries)
}

/// Recompute each entry from its phase record and report the first mismatch.
pub fn verify(chain: &[HashChainEntry], phases: &[PhaseRecord]) -> Result<ChainVerification> {
    if chain.len() != phases.len() {
        return Ok(ChainVerification {
            valid: false,
            broken_at: None,
            details: Some(format!(
                "chain has {} entries but {} phase records were supplied",
                chain.len(),
                phases.len()
            )),
        });
    }

    let mut previous: Option<String> = None;
    for (entry, record) in chain.iter().zip(phases) {
        if entry.phase != record.phase {
            return Ok(ChainVerification::broken(
                &record.phase,
                format!("phase name mismatch: '{}' vs '{}'", entry.phase, record.phase),
            ));
        }
        if entry.previous_hash != previous {
            return Ok(ChainVerification::broken(
                &entry.phase,
                "previous-hash link does not match the preceding entry",
            ));
        }

        let inputs_hash = hash_pairs(&record.inputs)?;
        if inputs_hash != entry.inputs_hash {
            return Ok(ChainVerification::broken(&entry.phase, "inputs hash mismatch"));
        }
        let outputs_hash = hash_pairs(&record.outputs)?;
        if outputs_hash != entry.outputs_hash {
            return Ok(ChainVerification::broken(&entry.phase, "outputs hash mismatch"));
        }

        let expected = entry_hash(
            previous.as_deref(),
            &inputs_hash,
            &outputs_hash,
            &entry.phase,
            &entry.provider_id,
            &entry.timestamp,
        );
        if expected != entry.hash {
            return Ok(ChainVerification::broken(&entry.phase, "entry hash mismatch"));
        }
        previous = Some(entry.hash.clone());
    }
    Ok(ChainVerification::ok())
}
