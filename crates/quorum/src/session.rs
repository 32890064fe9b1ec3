// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! File-backed recording of a deliberation.
//!
//! Each run owns one session directory: `meta.json` written once at start,
//! one `NN-<phase>.json` per executed phase, `synthesis.json` at the end,
//! plus auxiliary documents (adaptive decisions, topology plan, evidence
//! report). A global index file lists all sessions.
//!
//! Every write goes to a temporary file in the same directory and is
//! renamed into place, so readers never observe a partially written
//! document. The store is single-writer: only the engine writes here.
//! The index file is shared across processes; the temp-then-rename
//! discipline makes concurrent deliberations safe at whole-run granularity.

use crate::error::{QuorumError, Result};
use crate::phases::PhaseOutput;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Start-of-run metadata, written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMeta {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub input: String,
    pub profile: String,
    pub topology: String,
    pub providers: Vec<String>,
}

/// One row of the global session index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRow {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub winner: String,
    pub duration_ms: u64,
}

/// Handle on one session directory plus the global index.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    index_path: PathBuf,
}

impl SessionStore {
    /// Create the session directory (and parents) and return a handle.
    pub fn init(dir: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| QuorumError::Persist(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            index_path: index_path.into(),
        })
    }

    /// Open an existing session directory read-only (verification tools).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(QuorumError::Persist(format!(
                "session directory {} does not exist",
                dir.display()
            )));
        }
        let index_path = dir
            .parent()
            .map(|p| p.join("index.json"))
            .unwrap_or_else(|| dir.join("index.json"));
        Ok(Self { dir, index_path })
    }

    /// The session directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `meta.json`. Called once at run start.
    pub fn write_meta(&self, meta: &SessionMeta) -> Result<()> {
        self.write_json("meta", meta)
    }

    /// Read `meta.json` back.
    pub fn read_meta(&self) -> Result<SessionMeta> {
        self.read_json("meta")
    }

    /// Write one phase output under its file key, e.g. `04-debate`.
    pub fn write_phase(&self, key: &str, output: &PhaseOutput) -> Result<()> {
        self.write_json(key, output)
    }

    /// Phase file keys present in this session, sorted (their `NN-` prefix
    /// makes lexical order execution order).
    pub fn phase_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| QuorumError::Persist(format!("read {}: {e}", self.dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| QuorumError::Persist(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                if stem.len() > 3 && stem.as_bytes()[0].is_ascii_digit() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Read one phase output by file key.
    pub fn read_phase(&self, key: &str) -> Result<PhaseOutput> {
        self.read_json(key)
    }

    /// Write `synthesis.json` (the synthesis plus its vote result).
    pub fn write_synthesis<T: Serialize>(&self, record: &T) -> Result<()> {
        self.write_json("synthesis", record)
    }

    /// Generic auxiliary document write (`adaptive-decisions`,
    /// `topology-plan`, `evidence-report`, ...).
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(format!("{name}.json"));
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| QuorumError::Persist(format!("serialize {name}: {e}")))?;
        atomic_write(&path, text.as_bytes())
    }

    /// Generic auxiliary document read.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(format!("{name}.json"));
        let text = std::fs::read_to_string(&path)
            .map_err(|e| QuorumError::Persist(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| QuorumError::Persist(format!("parse {}: {e}", path.display())))
    }

    /// True when the named document exists in the session directory.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.dir.join(format!("{name}.json")).is_file()
    }

    /// Append a row to the global index, atomically rewriting the file.
    pub fn append_index(&self, row: IndexRow) -> Result<()> {
        let mut rows: Vec<IndexRow> = if self.index_path.is_file() {
            let text = std::fs::read_to_string(&self.index_path)
                .map_err(|e| QuorumError::Persist(format!("read index: {e}")))?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            Vec::new()
        };
        rows.push(row);
        let text = serde_json::to_string_pretty(&rows)
            .map_err(|e| QuorumError::Persist(format!("serialize index: {e}")))?;
        if let Some(parent) = self.index_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QuorumError::Persist(format!("create {}: {e}", parent.display())))?;
        }
        atomic_write(&self.index_path, text.as_bytes())
    }

    /// Read the global index.
    pub fn read_index(&self) -> Result<Vec<IndexRow>> {
        if !self.index_path.is_file() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.index_path)
            .map_err(|e| QuorumError::Persist(format!("read index: {e}")))?;
        serde_json::from_str(&text).map_err(|e| QuorumError::Persist(format!("parse index: {e}")))
    }
}

/// Write-to-temp-then-rename. The temp file lives in the target directory so
/// the rename stays on one filesystem.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| QuorumError::Persist(format!("{} has no parent", path.display())))?;
    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        std::process::id()
    ));
    std::fs::write(&tmp, bytes)
        .map_err(|e| QuorumError::Persist(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        QuorumError::Persist(format!("rename into {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::{names, PhaseInput, PhaseResponse};

    fn sample_phase(phase: &str) -> PhaseOutput {
        PhaseOutput {
            phase: phase.into(),
            timestamp: Utc::now(),
            duration_ms: 10,
            inputs: vec![PhaseInput {
                provider: "a".into(),
                system: None,
                prompt: "p".into(),
            }],
            responses: vec![PhaseResponse {
                provider: "a".into(),
                text: "r".into(),
                fallback: false,
            }],
        }
    }

    #[test]
    fn test_phase_round_trip_and_key_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::init(
            tmp.path().join("sessions/abc"),
            tmp.path().join("sessions/index.json"),
        )
        .unwrap();

        store.write_phase("02-plan", &sample_phase(names::PLAN)).unwrap();
        store
            .write_phase("01-gather", &sample_phase(names::GATHER))
            .unwrap();
        store
            .write_phase("04-debate-r2", &sample_phase(names::DEBATE))
            .unwrap();

        assert_eq!(
            store.phase_keys().unwrap(),
            vec!["01-gather", "02-plan", "04-debate-r2"]
        );
        let read = store.read_phase("01-gather").unwrap();
        assert_eq!(read.phase, names::GATHER);
    }

    #[test]
    fn test_meta_written_once_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::init(
            tmp.path().join("s/one"),
            tmp.path().join("s/index.json"),
        )
        .unwrap();
        let meta = SessionMeta {
            session_id: "one".into(),
            started_at: Utc::now(),
            input: "Q".into(),
            profile: "balanced".into(),
            topology: "mesh".into(),
            providers: vec!["a".into(), "b".into()],
        };
        store.write_meta(&meta).unwrap();
        assert_eq!(store.read_meta().unwrap().providers, meta.providers);
        // meta.json is not a phase file.
        assert!(store.phase_keys().unwrap().is_empty());
    }

    #[test]
    fn test_index_accumulates_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let index = tmp.path().join("index.json");
        for i in 0..3 {
            let store =
                SessionStore::init(tmp.path().join(format!("s{i}")), index.clone()).unwrap();
            store
                .append_index(IndexRow {
                    session_id: format!("s{i}"),
                    timestamp: Utc::now(),
                    question: "Q".into(),
                    winner: "a".into(),
                    duration_ms: 1,
                })
                .unwrap();
        }
        let store = SessionStore::init(tmp.path().join("s0"), index).unwrap();
        let rows = store.read_index().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].session_id, "s2");
    }

    #[test]
    fn test_no_partial_files_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::init(tmp.path().join("s"), tmp.path().join("i.json")).unwrap();
        store.write_json("meta", &serde_json::json!({"k": "v"})).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("s"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
