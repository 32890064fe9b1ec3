// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Final synthesis: prompt construction and tolerant response parsing.
//!
//! The synthesizer (typically the vote runner-up, to reduce confirmation
//! bias) is asked for `## Synthesis`, `## Minority Report`, and a
//! `## Scores` section with `Consensus:` and `Confidence:` lines. Parsing is
//! tolerant: missing scores default to 0.5, percentages normalize, section
//! headers are matched case-insensitively.

use crate::voting::VoteResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// The synthesized answer plus its self-reported scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Synthesis {
    pub content: String,
    pub synthesizer: String,
    /// How much the roster converged, in `[0,1]`.
    pub consensus_score: f64,
    /// The synthesizer's confidence in the answer, in `[0,1]`.
    pub confidence_score: f64,
    pub controversial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minority_report: Option<String>,
    /// Key points each provider contributed to the outcome.
    #[serde(default)]
    pub contributions: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_would_change: Option<String>,
}

/// What gets persisted as `synthesis.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisRecord {
    #[serde(flatten)]
    pub synthesis: Synthesis,
    pub votes: VoteResult,
}

/// Inputs assembled into the synthesis prompt.
#[derive(Debug, Clone, Default)]
pub struct SynthesisInputs {
    pub input: String,
    /// `(provider, finalized position)` in roster order.
    pub positions: Vec<(String, String)>,
    /// `(provider, rebuttal)` pairs, when a rebuttal phase ran.
    pub rebuttals: Vec<(String, String)>,
    pub vote_summary: String,
    pub evidence_summary: Option<String>,
    pub red_team_summary: Option<String>,
}

/// Build the synthesis user prompt.
#[must_use]
pub fn build_prompt(inputs: &SynthesisInputs) -> String {
    let mut prompt = format!(
        "Question:\n{}\n\nYou are the synthesizer. Combine the deliberation \
         below into a final answer.\n\n# Finalized positions\n",
        inputs.input
    );
    for (provider, position) in &inputs.positions {
        prompt.push_str(&format!("\n--- {provider} ---\n{position}\n"));
    }
    if !inputs.rebuttals.is_empty() {
        prompt.push_str("\n# Rebuttals\n");
        for (provider, rebuttal) in &inputs.rebuttals {
            prompt.push_str(&format!("\n--- {provider} ---\n{rebuttal}\n"));
        }
    }
    prompt.push_str(&format!("\n# Vote result\n{}\n", inputs.vote_summary));
    if let Some(evidence) = &inputs.evidence_summary {
        prompt.push_str(&format!("\n# Evidence cross-references\n{evidence}\n"));
    }
    if let Some(red_team) = &inputs.red_team_summary {
        prompt.push_str(&format!("\n# Red-team findings\n{red_team}\n"));
    }
    prompt.push_str(
        "\nRespond with exactly these sections:\n\
         ## Synthesis\n<the combined answer>\n\
         ## Minority Report\n<dissenting view worth preserving, or 'None'>\n\
         ## Scores\nConsensus: <0.0-1.0>\nConfidence: <0.0-1.0>\n",
    );
    prompt
}

fn score_re(label: &str) -> Regex {
    // Tolerant: "Consensus: 0.8", "consensus = 80%", "Consensus score is 0.8".
    Regex::new(&format!(
        r"(?i){label}[^0-9]*([0-9]+(?:\.[0-9]+)?)\s*(%)?"
    ))
    .unwrap_or_else(|_| Regex::new("$^").unwrap())
}

fn consensus_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| score_re("consensus"))
}

fn confidence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| score_re("confidence"))
}

/// Parse a score with the tolerant rule; absent scores default to 0.5.
fn parse_score(re: &Regex, text: &str) -> f64 {
    let Some(captures) = re.captures(text) else {
        return 0.5;
    };
    let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
        return 0.5;
    };
    let percent = captures.get(2).is_some() || number > 1.0;
    let value = if percent { number / 100.0 } else { number };
    value.clamp(0.0, 1.0)
}

/// Extract a `## <header>` section body, up to the next `## ` or end.
fn section(text: &str, header: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let marker = format!("## {}", header.to_lowercase());
    let start = lower.find(&marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find("\n## ").unwrap_or(rest.len());
    let body = rest[..end].trim();
    if body.is_empty() || body.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(body.to_string())
    }
}

/// Parse the synthesizer's raw response.
#[must_use]
pub fn parse_response(
    raw: &str,
    synthesizer: &str,
    controversial: bool,
    contributions: BTreeMap<String, Vec<String>>,
) -> Synthesis {
    let content = section(raw, "synthesis").unwrap_or_else(|| raw.trim().to_string());
    Synthesis {
        content,
        synthesizer: synthesizer.to_string(),
        consensus_score: parse_score(consensus_re(), raw),
        confidence_score: parse_score(confidence_re(), raw),
        controversial,
        minority_report: section(raw, "minority report"),
        contributions,
        what_would_change: section(raw, "what would change"),
    }
}

/// Key contribution points for a provider: the first sentences of its
/// finalized position.
#[must_use]
pub fn contribution_points(position: &str, max_points: usize) -> Vec<String> {
    position
        .split(['.', '\n'])
        .map(str::trim)
        .filter(|s| s.split_whitespace().count() >= 4)
        .take(max_points)
        .map(|s| format!("{s}."))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let raw = "## Synthesis\nRust fits the workload.\n\n\
                   ## Minority Report\nGo remains simpler to onboard.\n\n\
                   ## Scores\nConsensus: 0.82\nConfidence: 0.9\n";
        let synthesis = parse_response(raw, "claude", false, BTreeMap::new());
        assert_eq!(synthesis.content, "Rust fits the workload.");
        assert_eq!(
            synthesis.minority_report.as_deref(),
            Some("Go remains simpler to onboard.")
        );
        assert!((synthesis.consensus_score - 0.82).abs() < 1e-9);
        assert!((synthesis.confidence_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_missing_scores_default_to_half() {
        let synthesis = parse_response("Just an answer.", "gpt", true, BTreeMap::new());
        assert_eq!(synthesis.consensus_score, 0.5);
        assert_eq!(synthesis.confidence_score, 0.5);
        assert_eq!(synthesis.content, "Just an answer.");
        assert!(synthesis.controversial);
        assert!(synthesis.minority_report.is_none());
    }

    #[test]
    fn test_percentage_scores_normalize() {
        let raw = "## Scores\nConsensus: 85%\nConfidence = 70\n";
        let synthesis = parse_response(raw, "gpt", false, BTreeMap::new());
        assert!((synthesis.consensus_score - 0.85).abs() < 1e-9);
        assert!((synthesis.confidence_score - 0.70).abs() < 1e-9);
    }

    #[test]
    fn test_none_minority_report_is_absent() {
        let raw = "## Synthesis\nAnswer.\n## Minority Report\nNone\n## Scores\nConsensus: 1\nConfidence: 1";
        let synthesis = parse_response(raw, "gpt", false, BTreeMap::new());
        assert!(synthesis.minority_report.is_none());
        assert_eq!(synthesis.consensus_score, 1.0);
    }

    #[test]
    fn test_prompt_lists_all_material() {
        let inputs = SynthesisInputs {
            input: "Which database?".into(),
            positions: vec![
                ("gpt".into(), "Use Postgres.".into()),
                ("claude".into(), "Use SQLite.".into()),
            ],
            rebuttals: vec![("gpt".into(), "SQLite will not scale here.".into())],
            vote_summary: "winner: gpt (score 4.0)".into(),
            evidence_summary: Some("1 corroborated group".into()),
            red_team_summary: None,
        };
        let prompt = build_prompt(&inputs);
        assert!(prompt.contains("Which database?"));
        assert!(prompt.contains("--- claude ---"));
        assert!(prompt.contains("# Rebuttals"));
        assert!(prompt.contains("winner: gpt"));
        assert!(prompt.contains("## Scores"));
        assert!(!prompt.contains("Red-team"));
    }

    #[test]
    fn test_contribution_points_take_leading_sentences() {
        let points = contribution_points(
            "Postgres handles concurrency well. It also has mature tooling. Ignore this? Yes.",
            2,
        );
        assert_eq!(points.len(), 2);
        assert!(points[0].contains("concurrency"));
    }
}
