// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Persistent memory of prior deliberations.
//!
//! A single JSON file keyed by session id. Retrieval is keyword-based:
//! inputs tokenize to lowercase terms and candidates score by Jaccard
//! overlap. Contradiction detection compares a new synthesis against prior
//! nodes by entity overlap plus polarity. Writers use the same
//! temp-then-rename discipline as the session store, so concurrent
//! deliberations are safe at whole-run granularity.

use crate::error::{QuorumError, Result};
use crate::session::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One remembered deliberation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryNode {
    pub session_id: String,
    pub input: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A retrieval hit with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub node: MemoryNode,
    pub score: f64,
}

/// File-backed store of [`MemoryNode`]s.
#[derive(Debug, Clone)]
pub struct MemoryGraph {
    path: PathBuf,
}

impl MemoryGraph {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<MemoryNode>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| QuorumError::Persist(format!("read memory: {e}")))?;
        serde_json::from_str(&text).map_err(|e| QuorumError::Persist(format!("parse memory: {e}")))
    }

    fn save(&self, nodes: &[MemoryNode]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QuorumError::Persist(format!("create {}: {e}", parent.display())))?;
        }
        let text = serde_json::to_string_pretty(nodes)
            .map_err(|e| QuorumError::Persist(format!("serialize memory: {e}")))?;
        atomic_write(&self.path, text.as_bytes())
    }

    /// Insert or replace the node for a session id.
    pub fn record(&self, node: MemoryNode) -> Result<()> {
        let mut nodes = self.load()?;
        nodes.retain(|n| n.session_id != node.session_id);
        nodes.push(node);
        self.save(&nodes)
    }

    /// All nodes, oldest first.
    pub fn nodes(&self) -> Result<Vec<MemoryNode>> {
        self.load()
    }

    /// Top-`k` prior nodes whose input and tags overlap `input` at or above
    /// `threshold`, best first.
    pub fn find_similar(&self, input: &str, k: usize, threshold: f64) -> Result<Vec<MemoryHit>> {
        let query = terms(input);
        let mut hits: Vec<MemoryHit> = self
            .load()?
            .into_iter()
            .filter_map(|node| {
                let mut node_terms = terms(&node.input);
                for tag in &node.tags {
                    node_terms.extend(terms(tag));
                }
                let score = jaccard(&query, &node_terms);
                (score >= threshold).then_some(MemoryHit { node, score })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// One short sentence per prior node whose conclusion contradicts the
    /// synthesis, judged by entity overlap with opposite polarity.
    pub fn detect_contradictions(
        &self,
        synthesis: &str,
        hits: &[MemoryHit],
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        let sentences: Vec<&str> = synthesis
            .split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        for hit in hits {
            let node_terms = terms(&hit.node.input);
            let node_polarity = negative(&hit.node.input);
            let conflict = sentences.iter().any(|sentence| {
                let sentence_terms = terms(sentence);
                jaccard(&node_terms, &sentence_terms) >= 0.3 && negative(sentence) != node_polarity
            });
            if conflict {
                let winner = hit.node.winner.as_deref().unwrap_or("unknown");
                warnings.push(format!(
                    "Prior deliberation {} (winner: {winner}) reached a conflicting conclusion on: {}",
                    hit.node.session_id, hit.node.input
                ));
            }
        }
        warnings
    }

    /// Render retrieval hits as a prompt-injectable summary.
    #[must_use]
    pub fn summarize(hits: &[MemoryHit]) -> String {
        hits.iter()
            .map(|hit| {
                let winner = hit.node.winner.as_deref().unwrap_or("n/a");
                format!(
                    "- {} (winner: {winner}, consensus: {}): {}",
                    hit.node.timestamp.format("%Y-%m-%d"),
                    hit.node
                        .consensus_score
                        .map_or("n/a".to_string(), |s| format!("{s:.2}")),
                    hit.node.input
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

const NEGATORS: &[&str] = &["not", "no", "never", "cannot", "shouldn't", "won't", "avoid"];

fn negative(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|w| NEGATORS.contains(&w))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, input: &str, winner: Option<&str>) -> MemoryNode {
        MemoryNode {
            session_id: id.into(),
            input: input.into(),
            tags: vec![],
            consensus_score: Some(0.8),
            winner: winner.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_upserts_by_session_id() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = MemoryGraph::new(tmp.path().join("memory.json"));
        graph.record(node("s1", "first question", None)).unwrap();
        graph.record(node("s1", "revised question", None)).unwrap();
        graph.record(node("s2", "other question", None)).unwrap();

        let nodes = graph.nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].input, "revised question");
    }

    #[test]
    fn test_similarity_retrieval_ranks_by_overlap() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = MemoryGraph::new(tmp.path().join("memory.json"));
        graph
            .record(node("s1", "should we adopt rust for the backend service", None))
            .unwrap();
        graph
            .record(node("s2", "what color should the logo be", None))
            .unwrap();

        let hits = graph
            .find_similar("should we adopt rust for our backend", 5, 0.2)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.session_id, "s1");
        assert!(hits[0].score > 0.5);
    }

    #[test]
    fn test_threshold_filters_weak_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = MemoryGraph::new(tmp.path().join("memory.json"));
        graph.record(node("s1", "completely unrelated topic", None)).unwrap();
        let hits = graph.find_similar("rust backend adoption", 5, 0.2).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_contradiction_detected_on_polarity_flip() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = MemoryGraph::new(tmp.path().join("memory.json"));
        let prior = node(
            "s1",
            "we should not adopt rust for the backend service",
            Some("claude"),
        );
        let hits = vec![MemoryHit {
            node: prior,
            score: 0.9,
        }];
        let warnings = graph.detect_contradictions(
            "We should adopt rust for the backend service. The migration cost is acceptable.",
            &hits,
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("s1"));
        assert!(warnings[0].contains("claude"));
    }

    #[test]
    fn test_summary_lists_hits() {
        let hits = vec![MemoryHit {
            node: node("s1", "prior question", Some("gpt")),
            score: 0.5,
        }];
        let summary = MemoryGraph::summarize(&hits);
        assert!(summary.contains("prior question"));
        assert!(summary.contains("winner: gpt"));
    }
}
