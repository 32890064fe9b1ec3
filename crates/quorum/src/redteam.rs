// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Red-team attack packs.
//!
//! An attack pack is a YAML list of adversarial vectors. When a profile
//! enables red-teaming, the engine runs an extra phase in which every
//! participant attacks the leading positions along these vectors; findings
//! are persisted to `redteam-result.json` and surfaced to synthesis.

use crate::error::{QuorumError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A named set of attack vectors, consumed read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttackPack {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub vectors: Vec<String>,
}

impl AttackPack {
    /// Load a pack from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuorumError::Config(format!("cannot read {}: {e}", path.display())))?;
        let pack: Self = serde_yml::from_str(&text)
            .map_err(|e| QuorumError::Config(format!("invalid attack pack {}: {e}", path.display())))?;
        if pack.vectors.is_empty() {
            return Err(QuorumError::Validation(format!(
                "attack pack '{}' has no vectors",
                pack.name
            )));
        }
        Ok(pack)
    }

    /// Resolve `<name>.yaml` under the attacks directory, falling back to a
    /// built-in general pack for the name `"general"`.
    pub fn resolve(name: &str, attacks_dir: &Path) -> Result<Self> {
        let path = attacks_dir.join(format!("{name}.yaml"));
        if path.is_file() {
            return Self::load(&path);
        }
        if name == "general" {
            return Ok(Self::general());
        }
        Err(QuorumError::Config(format!(
            "attack pack '{name}' not found in {}",
            attacks_dir.display()
        )))
    }

    /// Built-in pack covering the common failure modes of model answers.
    #[must_use]
    pub fn general() -> Self {
        Self {
            name: "general".into(),
            description: "general-purpose robustness probes".into(),
            vectors: vec![
                "Identify any claim that would fail under an edge case the answer ignores.".into(),
                "Find unstated assumptions that, if false, invalidate the conclusion.".into(),
                "Check internal consistency: do any two statements contradict?".into(),
                "Probe for overconfidence: which claims lack any supporting source?".into(),
            ],
        }
    }

    /// Render vectors as a prompt block.
    #[must_use]
    pub fn prompt_block(&self) -> String {
        self.vectors
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{}. {v}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Findings from the red-team phase, persisted per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedTeamResult {
    pub pack: String,
    /// `(provider, findings text)` in roster order.
    pub findings: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pack_renders() {
        let pack = AttackPack::general();
        let block = pack.prompt_block();
        assert!(block.starts_with("1. "));
        assert_eq!(block.lines().count(), pack.vectors.len());
    }

    #[test]
    fn test_load_and_resolve() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("injection.yaml"),
            "name: injection\ndescription: prompt injection probes\nvectors:\n  - try a nested instruction\n",
        )
        .unwrap();
        let pack = AttackPack::resolve("injection", tmp.path()).unwrap();
        assert_eq!(pack.vectors.len(), 1);
        assert!(AttackPack::resolve("general", tmp.path()).is_ok());
        assert!(AttackPack::resolve("nonexistent", tmp.path()).is_err());
    }

    #[test]
    fn test_empty_pack_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.yaml");
        std::fs::write(&path, "name: empty\nvectors: []\n").unwrap();
        assert!(AttackPack::load(&path).is_err());
    }
}
