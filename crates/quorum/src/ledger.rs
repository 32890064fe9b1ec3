// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Cross-session append-only ledger.
//!
//! Every completed deliberation appends one hash-chained entry. The file is
//! small JSON behind a stable interface: entries are frozen once appended,
//! `entries[i].previous_hash == entries[i-1].hash`, and `verify_integrity`
//! recomputes every hash to find the first break. Entries carry enough
//! context (input, profile, roster) to replay a deliberation later.

use crate::canonical::to_canonical_string;
use crate::error::{QuorumError, Result};
use crate::session::atomic_write;
use crate::synthesis::Synthesis;
use crate::voting::VoteResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// One frozen deliberation outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    /// Session id of the run.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub input: String,
    pub profile: String,
    pub providers: Vec<String>,
    pub topology: String,
    pub synthesis: Synthesis,
    pub votes: VoteResult,
    /// Engine options snapshot for replay.
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    pub hash: String,
}

/// Outcome of [`Ledger::verify_integrity`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerVerification {
    pub valid: bool,
    /// Id of the first broken entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LedgerFile {
    version: u32,
    entries: Vec<LedgerEntry>,
}

/// Handle on the ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

/// Hash over the canonical encoding of the entry with its own hash blanked.
fn entry_hash(entry: &LedgerEntry) -> Result<String> {
    let mut value = serde_json::to_value(entry)
        .map_err(|e| QuorumError::Persist(format!("serialize ledger entry: {e}")))?;
    if let Some(map) = value.as_object_mut() {
        map.remove("hash");
    }
    let canonical = to_canonical_string(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

impl Ledger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<LedgerFile> {
        if !self.path.is_file() {
            return Ok(LedgerFile {
                version: 1,
                entries: Vec::new(),
            });
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| QuorumError::Persist(format!("read ledger: {e}")))?;
        serde_json::from_str(&text).map_err(|e| QuorumError::Persist(format!("parse ledger: {e}")))
    }

    fn save(&self, file: &LedgerFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QuorumError::Persist(format!("create {}: {e}", parent.display())))?;
        }
        let text = serde_json::to_string_pretty(file)
            .map_err(|e| QuorumError::Persist(format!("serialize ledger: {e}")))?;
        atomic_write(&self.path, text.as_bytes())
    }

    /// Chain a new entry after the last. The entry's `previous_hash` and
    /// `hash` fields are filled here; caller values are ignored.
    pub fn append(&self, mut entry: LedgerEntry) -> Result<LedgerEntry> {
        let mut file = self.load()?;
        entry.previous_hash = file.entries.last().map(|e| e.hash.clone());
        entry.hash = String::new();
        entry.hash = entry_hash(&entry)?;
        file.entries.push(entry.clone());
        self.save(&file)?;
        Ok(entry)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.load()?.entries)
    }

    /// Entry by session id, or the most recent when `id` is `None`.
    pub fn get(&self, id: Option<&str>) -> Result<LedgerEntry> {
        let entries = self.entries()?;
        match id {
            Some(id) => entries
                .into_iter()
                .find(|e| e.id == id)
                .ok_or_else(|| QuorumError::Config(format!("no ledger entry '{id}'"))),
            None => entries
                .into_iter()
                .last()
                .ok_or_else(|| QuorumError::Config("ledger is empty".into())),
        }
    }

    /// Walk the list, recomputing hashes and checking links.
    pub fn verify_integrity(&self) -> Result<LedgerVerification> {
        let entries = self.entries()?;
        let mut previous: Option<&str> = None;
        for entry in &entries {
            if entry.previous_hash.as_deref() != previous {
                return Ok(LedgerVerification {
                    valid: false,
                    broken_at: Some(entry.id.clone()),
                    message: format!("entry '{}' does not link to its predecessor", entry.id),
                });
            }
            let mut check = entry.clone();
            check.hash = String::new();
            if entry_hash(&check)? != entry.hash {
                return Ok(LedgerVerification {
                    valid: false,
                    broken_at: Some(entry.id.clone()),
                    message: format!("entry '{}' hash mismatch", entry.id),
                });
            }
            previous = Some(entry.hash.as_str());
        }
        Ok(LedgerVerification {
            valid: true,
            broken_at: None,
            message: format!("{} entries verified", entries.len()),
        })
    }
}

/// Render an entry as an architecture-decision-record style document.
#[must_use]
pub fn export_adr(entry: &LedgerEntry) -> String {
    let mut adr = format!(
        "# Decision record: {}\n\nDate: {}\nStatus: accepted\nDeliberated by: {}\nTopology: {} | Profile: {} | Method: {}\n\n",
        entry.id,
        entry.timestamp.format("%Y-%m-%d"),
        entry.providers.join(", "),
        entry.topology,
        entry.profile,
        entry.votes.method,
    );
    adr.push_str(&format!("## Context\n\n{}\n\n", entry.input));
    adr.push_str(&format!("## Decision\n\n{}\n\n", entry.synthesis.content));
    adr.push_str(&format!(
        "## Confidence\n\nConsensus: {:.2} | Confidence: {:.2} | Winner: {} ({})\n",
        entry.synthesis.consensus_score,
        entry.synthesis.confidence_score,
        entry.votes.winner,
        if entry.votes.controversial {
            "controversial"
        } else {
            "clear"
        },
    ));
    if let Some(minority) = &entry.synthesis.minority_report {
        adr.push_str(&format!("\n## Minority report\n\n{minority}\n"));
    }
    adr
}

/// Line-by-line comparison of a recorded synthesis against a replayed one.
#[must_use]
pub fn diff_synthesis(recorded: &str, replayed: &str) -> String {
    let old: Vec<&str> = recorded.lines().collect();
    let new: Vec<&str> = replayed.lines().collect();
    let mut out = String::new();
    let len = old.len().max(new.len());
    let mut changed = 0usize;
    for i in 0..len {
        match (old.get(i), new.get(i)) {
            (Some(o), Some(n)) if o == n => out.push_str(&format!("  {o}\n")),
            (Some(o), Some(n)) => {
                out.push_str(&format!("- {o}\n+ {n}\n"));
                changed += 1;
            }
            (Some(o), None) => {
                out.push_str(&format!("- {o}\n"));
                changed += 1;
            }
            (None, Some(n)) => {
                out.push_str(&format!("+ {n}\n"));
                changed += 1;
            }
            (None, None) => {}
        }
    }
    if changed == 0 {
        out.push_str("replayed synthesis is identical\n");
    } else {
        out.push_str(&format!("{changed} line(s) differ\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::{ScoredCandidate, VotingMethod};
    use std::collections::BTreeMap;

    fn entry(id: &str) -> LedgerEntry {
        LedgerEntry {
            id: id.into(),
            timestamp: Utc::now(),
            input: "Which cache?".into(),
            profile: "balanced".into(),
            providers: vec!["a".into(), "b".into()],
            topology: "mesh".into(),
            synthesis: Synthesis {
                content: "Use an LRU cache.".into(),
                synthesizer: "b".into(),
                consensus_score: 0.8,
                confidence_score: 0.7,
                controversial: false,
                minority_report: None,
                contributions: BTreeMap::new(),
                what_would_change: None,
            },
            votes: VoteResult {
                rankings: vec![
                    ScoredCandidate {
                        provider: "a".into(),
                        score: 3.0,
                    },
                    ScoredCandidate {
                        provider: "b".into(),
                        score: 1.0,
                    },
                ],
                winner: "a".into(),
                controversial: false,
                method: VotingMethod::Borda,
                details: BTreeMap::new(),
                voting_details: None,
            },
            options: serde_json::Value::Null,
            previous_hash: None,
            hash: String::new(),
        }
    }

    #[test]
    fn test_append_chains_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(tmp.path().join("ledger.json"));
        let first = ledger.append(entry("s1")).unwrap();
        let second = ledger.append(entry("s2")).unwrap();

        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash.as_deref(), Some(first.hash.as_str()));

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        for i in 1..entries.len() {
            assert_eq!(
                entries[i].previous_hash.as_deref(),
                Some(entries[i - 1].hash.as_str())
            );
        }
    }

    #[test]
    fn test_verify_detects_tampering() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger.json");
        let ledger = Ledger::new(&path);
        ledger.append(entry("s1")).unwrap();
        ledger.append(entry("s2")).unwrap();
        assert!(ledger.verify_integrity().unwrap().valid);

        // Flip one character of the recorded input.
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("Which cache?", "Which cash?")).unwrap();
        let verification = ledger.verify_integrity().unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.broken_at.as_deref(), Some("s1"));
    }

    #[test]
    fn test_get_by_id_and_last() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(tmp.path().join("ledger.json"));
        ledger.append(entry("s1")).unwrap();
        ledger.append(entry("s2")).unwrap();

        assert_eq!(ledger.get(Some("s1")).unwrap().id, "s1");
        assert_eq!(ledger.get(None).unwrap().id, "s2");
        assert!(ledger.get(Some("nope")).is_err());
    }

    #[test]
    fn test_adr_export_sections() {
        let adr = export_adr(&entry("s1"));
        assert!(adr.contains("# Decision record: s1"));
        assert!(adr.contains("## Context"));
        assert!(adr.contains("Which cache?"));
        assert!(adr.contains("## Decision"));
        assert!(adr.contains("LRU"));
        assert!(adr.contains("Winner: a"));
    }

    #[test]
    fn test_diff_synthesis_marks_changes() {
        let diff = diff_synthesis("line one\nline two", "line one\nline 2\nextra");
        assert!(diff.contains("  line one"));
        assert!(diff.contains("- line two"));
        assert!(diff.contains("+ line 2"));
        assert!(diff.contains("+ extra"));
        assert!(diff.contains("2 line(s) differ"));

        let same = diff_synthesis("a\nb", "a\nb");
        assert!(same.contains("identical"));
    }
}
