// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Rolling provider reputation.
//!
//! The arena keeps win/loss counts and cumulative vote scores per provider
//! across deliberations. When a profile enables reputation weighting, the
//! engine multiplies each candidate's vote weight by [`Arena::weight_for`],
//! which stays in a narrow band so reputation nudges rather than dominates.

use crate::error::{QuorumError, Result};
use crate::session::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-provider rolling statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderStats {
    pub wins: u64,
    pub losses: u64,
    pub total_score: f64,
    pub runs: u64,
}

impl ProviderStats {
    /// Wins over decided runs; 0.5 when unseen.
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        let decided = self.wins + self.losses;
        if decided == 0 {
            0.5
        } else {
            self.wins as f64 / decided as f64
        }
    }
}

/// File-backed reputation store.
#[derive(Debug, Clone)]
pub struct Arena {
    path: PathBuf,
}

impl Arena {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<BTreeMap<String, ProviderStats>> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| QuorumError::Persist(format!("read arena: {e}")))?;
        serde_json::from_str(&text).map_err(|e| QuorumError::Persist(format!("parse arena: {e}")))
    }

    fn save(&self, stats: &BTreeMap<String, ProviderStats>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QuorumError::Persist(format!("create {}: {e}", parent.display())))?;
        }
        let text = serde_json::to_string_pretty(stats)
            .map_err(|e| QuorumError::Persist(format!("serialize arena: {e}")))?;
        atomic_write(&self.path, text.as_bytes())
    }

    /// Record one deliberation's outcome: the winner and every candidate's
    /// final vote score.
    pub fn record_outcome(&self, winner: &str, scores: &[(String, f64)]) -> Result<()> {
        let mut stats = self.load()?;
        for (provider, score) in scores {
            let entry = stats.entry(provider.clone()).or_default();
            entry.runs += 1;
            entry.total_score += *score;
            if provider.as_str() == winner {
                entry.wins += 1;
            } else {
                entry.losses += 1;
            }
        }
        self.save(&stats)
    }

    /// All stats, provider-sorted.
    pub fn stats(&self) -> Result<BTreeMap<String, ProviderStats>> {
        self.load()
    }

    /// Vote-weight factor in `[0.75, 1.25]`: `0.75 + 0.5 × win_rate`.
    /// Unseen providers sit at the neutral 1.0.
    pub fn weight_for(&self, provider: &str) -> Result<f64> {
        let stats = self.load()?;
        Ok(stats
            .get(provider)
            .map_or(1.0, |s| 0.75 + 0.5 * s.win_rate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_accumulate() {
        let tmp = tempfile::tempdir().unwrap();
        let arena = Arena::new(tmp.path().join("arena.json"));
        arena
            .record_outcome("a", &[("a".into(), 4.0), ("b".into(), 2.0)])
            .unwrap();
        arena
            .record_outcome("b", &[("a".into(), 1.0), ("b".into(), 3.0)])
            .unwrap();

        let stats = arena.stats().unwrap();
        assert_eq!(stats["a"].wins, 1);
        assert_eq!(stats["a"].losses, 1);
        assert_eq!(stats["a"].runs, 2);
        assert_eq!(stats["b"].total_score, 5.0);
    }

    #[test]
    fn test_weight_band() {
        let tmp = tempfile::tempdir().unwrap();
        let arena = Arena::new(tmp.path().join("arena.json"));
        assert_eq!(arena.weight_for("unknown").unwrap(), 1.0);

        arena.record_outcome("a", &[("a".into(), 1.0), ("b".into(), 0.0)]).unwrap();
        arena.record_outcome("a", &[("a".into(), 1.0), ("b".into(), 0.0)]).unwrap();
        let winner_weight = arena.weight_for("a").unwrap();
        let loser_weight = arena.weight_for("b").unwrap();
        assert_eq!(winner_weight, 1.25);
        assert_eq!(loser_weight, 0.75);
    }
}
