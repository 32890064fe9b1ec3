// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Per-session attestation chains.
//!
//! An attestation chain is derived deterministically from a session
//! directory: every phase file reduces to a [`PhaseRecord`] and the records
//! fold into a hash chain. `verify` recomputes the chain against the
//! directory; `diff` compares two chains phase-by-phase, ignoring
//! timestamps, so two runs with identical prompts and outputs attest as
//! identical.
//!
//! Export formats: canonical JSON (byte-stable) and a binary frame
//! (big-endian u32 length prefix over the canonical JSON bytes).

use crate::canonical::to_canonical_string;
use crate::error::{QuorumError, Result};
use crate::hashchain::{self, ChainVerification, HashChainEntry, PhaseRecord};
use crate::session::SessionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The per-session chain document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttestationChain {
    pub version: u32,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub records: Vec<HashChainEntry>,
}

/// Comparison status for one phase position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DiffStatus {
    Match,
    Diverged,
    OnlyLeft,
    OnlyRight,
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiffStatus::Match => "match",
            DiffStatus::Diverged => "diverged",
            DiffStatus::OnlyLeft => "only-left",
            DiffStatus::OnlyRight => "only-right",
        };
        write!(f, "{s}")
    }
}

/// One phase position in a chain diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffEntry {
    pub phase: String,
    pub status: DiffStatus,
    pub detail: String,
}

/// Result of comparing two chains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainDiff {
    pub entries: Vec<DiffEntry>,
    /// Name of the first non-matching phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diverged_at: Option<String>,
}

/// Rebuild the phase records a session directory attests to.
fn session_records(store: &SessionStore) -> Result<(String, Vec<PhaseRecord>)> {
    let meta = store.read_meta()?;
    // The chain's provider id is the roster, so two sessions over the same
    // provider set attest comparably.
    let provider_id = meta.providers.join(",");
    let mut records = Vec::new();
    for key in store.phase_keys()? {
        let output = store.read_phase(&key)?;
        records.push(output.to_record(&provider_id));
    }
    Ok((meta.session_id, records))
}

/// Derive the attestation chain for a session directory.
pub fn build(store: &SessionStore) -> Result<AttestationChain> {
    let (session_id, records) = session_records(store)?;
    if records.is_empty() {
        return Err(QuorumError::Integrity(format!(
            "session {session_id} has no phase files to attest"
        )));
    }
    Ok(AttestationChain {
        version: 1,
        session_id,
        created_at: Utc::now(),
        records: hashchain::build(&records)?,
    })
}

/// Recompute the chain from the session directory and compare.
pub fn verify(chain: &AttestationChain, store: &SessionStore) -> Result<ChainVerification> {
    let (_, records) = session_records(store)?;
    hashchain::verify(&chain.records, &records)
}

fn compare(left: &HashChainEntry, right: &HashChainEntry) -> (DiffStatus, String) {
    if left.phase != right.phase {
        return (
            DiffStatus::Diverged,
            format!("phase mismatch: '{}' vs '{}'", left.phase, right.phase),
        );
    }
    if left.inputs_hash != right.inputs_hash {
        return (DiffStatus::Diverged, "inputs differ".into());
    }
    if left.outputs_hash != right.outputs_hash {
        return (DiffStatus::Diverged, "outputs differ".into());
    }
    if left.provider_id != right.provider_id {
        return (DiffStatus::Diverged, "provider differ".into());
    }
    (DiffStatus::Match, "identical phase content".into())
}

/// Compare two chains phase-by-phase. Timestamps and entry hashes are
/// ignored; content hashes decide.
#[must_use]
pub fn diff(left: &AttestationChain, right: &AttestationChain) -> ChainDiff {
    let len = left.records.len().max(right.records.len());
    let mut entries = Vec::with_capacity(len);
    for i in 0..len {
        let entry = match (left.records.get(i), right.records.get(i)) {
            (Some(l), Some(r)) => {
                let (status, detail) = compare(l, r);
                DiffEntry {
                    phase: l.phase.clone(),
                    status,
                    detail,
                }
            }
            (Some(l), None) => DiffEntry {
                phase: l.phase.clone(),
                status: DiffStatus::OnlyLeft,
                detail: format!("phase '{}' present only in {}", l.phase, left.session_id),
            },
            (None, Some(r)) => DiffEntry {
                phase: r.phase.clone(),
                status: DiffStatus::OnlyRight,
                detail: format!("phase '{}' present only in {}", r.phase, right.session_id),
            },
            (None, None) => continue,
        };
        entries.push(entry);
    }
    let diverged_at = entries
        .iter()
        .find(|e| e.status != DiffStatus::Match)
        .map(|e| e.phase.clone());
    ChainDiff {
        entries,
        diverged_at,
    }
}

/// Human-readable diff report.
#[must_use]
pub fn format_diff(left: &AttestationChain, right: &AttestationChain, diff: &ChainDiff) -> String {
    let mut out = format!(
        "attestation diff: {} vs {}\n",
        left.session_id, right.session_id
    );
    for entry in &diff.entries {
        out.push_str(&format!(
            "  {:<12} {:<10} {}\n",
            entry.phase, entry.status, entry.detail
        ));
    }
    match &diff.diverged_at {
        Some(phase) => out.push_str(&format!("diverged at: {phase}\n")),
        None => out.push_str("chains are identical\n"),
    }
    out
}

/// Byte-stable canonical JSON export.
pub fn export_canonical(chain: &AttestationChain) -> Result<String> {
    to_canonical_string(chain)
}

/// Binary frame: big-endian u32 length prefix over the canonical JSON.
pub fn export_binary(chain: &AttestationChain) -> Result<Vec<u8>> {
    let json = to_canonical_string(chain)?;
    let bytes = json.as_bytes();
    let len = u32::try_from(bytes.len())
        .map_err(|_| QuorumError::Integrity("attestation chain exceeds frame size".into()))?;
    let mut frame = Vec::with_capacity(4 + bytes.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(bytes);
    Ok(frame)
}

/// Decode a binary frame back into a chain.
pub fn import_binary(frame: &[u8]) -> Result<AttestationChain> {
    if frame.len() < 4 {
        return Err(QuorumError::Parse("attestation frame too short".into()));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&frame[..4]);
    let len = u32::from_be_bytes(len_bytes) as usize;
    let body = frame
        .get(4..4 + len)
        .ok_or_else(|| QuorumError::Parse("attestation frame truncated".into()))?;
    serde_json::from_slice(body)
        .map_err(|e| QuorumError::Parse(format!("attestation frame body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::{names, PhaseInput, PhaseOutput, PhaseResponse};
    use crate::session::SessionMeta;

    fn write_session(
        root: &std::path::Path,
        id: &str,
        phases: &[(&str, &str, &str)], // (key, phase, output text)
    ) -> SessionStore {
        let store = SessionStore::init(root.join(id), root.join("index.json")).unwrap();
        store
            .write_meta(&SessionMeta {
                session_id: id.into(),
                started_at: Utc::now(),
                input: "Q".into(),
                profile: "balanced".into(),
                topology: "mesh".into(),
                providers: vec!["a".into(), "b".into()],
            })
            .unwrap();
        for (key, phase, text) in phases {
            store
                .write_phase(
                    key,
                    &PhaseOutput {
                        phase: (*phase).into(),
                        timestamp: Utc::now(),
                        duration_ms: 1,
                        inputs: vec![PhaseInput {
                            provider: "a".into(),
                            system: None,
                            prompt: format!("{phase} prompt"),
                        }],
                        responses: vec![PhaseResponse {
                            provider: "a".into(),
                            text: (*text).into(),
                            fallback: false,
                        }],
                    },
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_build_and_verify_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = write_session(
            tmp.path(),
            "s1",
            &[("01-gather", names::GATHER, "facts"), ("02-debate", names::DEBATE, "args")],
        );
        let chain = build(&store).unwrap();
        assert_eq!(chain.records.len(), 2);
        assert!(verify(&chain, &store).unwrap().valid);
    }

    #[test]
    fn test_identical_sessions_diff_as_match() {
        let tmp = tempfile::tempdir().unwrap();
        let phases = [("01-gather", names::GATHER, "facts")];
        let left = build(&write_session(tmp.path(), "s1", &phases)).unwrap();
        let right = build(&write_session(tmp.path(), "s2", &phases)).unwrap();

        let result = diff(&left, &right);
        assert!(result.entries.iter().all(|e| e.status == DiffStatus::Match));
        assert!(result.diverged_at.is_none());

        let report = format_diff(&left, &right, &result);
        assert!(report.contains("s1"));
        assert!(report.contains("s2"));
        assert!(report.contains("identical"));
    }

    #[test]
    fn test_single_output_divergence() {
        let tmp = tempfile::tempdir().unwrap();
        let left =
            build(&write_session(tmp.path(), "s1", &[("01-gather", names::GATHER, "facts")]))
                .unwrap();
        let right =
            build(&write_session(tmp.path(), "s2", &[("01-gather", names::GATHER, "other")]))
                .unwrap();

        let result = diff(&left, &right);
        assert_eq!(result.entries[0].status, DiffStatus::Diverged);
        assert!(result.entries[0].detail.contains("outputs differ"));
        assert_eq!(result.diverged_at.as_deref(), Some(names::GATHER));
    }

    #[test]
    fn test_length_mismatch_reports_only_left() {
        let tmp = tempfile::tempdir().unwrap();
        let left = build(&write_session(
            tmp.path(),
            "s1",
            &[
                ("01-gather", names::GATHER, "facts"),
                ("02-debate", names::DEBATE, "args"),
            ],
        ))
        .unwrap();
        let right =
            build(&write_session(tmp.path(), "s2", &[("01-gather", names::GATHER, "facts")]))
                .unwrap();

        let result = diff(&left, &right);
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[1].status, DiffStatus::OnlyLeft);
        assert_eq!(result.diverged_at.as_deref(), Some(names::DEBATE));
    }

    #[test]
    fn test_binary_frame_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let chain =
            build(&write_session(tmp.path(), "s1", &[("01-gather", names::GATHER, "facts")]))
                .unwrap();
        let frame = export_binary(&chain).unwrap();
        let decoded = import_binary(&frame).unwrap();
        assert_eq!(decoded, chain);
        assert!(import_binary(&frame[..3]).is_err());
    }

    #[test]
    fn test_canonical_export_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let chain =
            build(&write_session(tmp.path(), "s1", &[("01-gather", names::GATHER, "facts")]))
                .unwrap();
        assert_eq!(
            export_canonical(&chain).unwrap(),
            export_canonical(&chain).unwrap()
        );
        assert!(export_canonical(&chain).unwrap().contains("\"records\""));
    }
}
