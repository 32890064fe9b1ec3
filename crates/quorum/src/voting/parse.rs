// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Staged parsing of voter responses into ballots.
//!
//! Three parsers run in order over the raw text; the first success wins:
//!
//! 1. a JSON block `{"rankings":[{"position":"A","rank":1,"reason":...}]}`,
//!    fenced or bare, with positions as anonymized letters;
//! 2. a numbered list whose lines mention position letters or provider names;
//! 3. a keyword heuristic looking for "best"/"winner"/"top" near a position.
//!
//! Candidates are anonymized as letters (A, B, ...) assigned by participant
//! order. Ties are not representable; duplicates collapse by first mention.
//! An unparseable response yields `None`, which the engine counts and warns.

use super::{Ballot, RankedCandidate};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A ballot plus the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBallot {
    pub ballot: Ballot,
    /// `"json"`, `"lines"`, or `"keyword"`.
    pub stage: &'static str,
}

/// Position letter for a participant index: 0 → `A`.
#[must_use]
pub fn position_letter(index: usize) -> char {
    (b'A' + (index as u8 % 26)) as char
}

#[derive(Debug, Deserialize)]
struct JsonRankings {
    rankings: Vec<JsonRanking>,
}

#[derive(Debug, Deserialize)]
struct JsonRanking {
    position: String,
    rank: usize,
    #[serde(default)]
    reason: Option<String>,
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

fn numbered_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*\d+\s*[.):-]\s*(.+)$").unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)\b(?:best|winner|top|strongest)\b[^.\n]*").unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

/// Parse one voter's response. `positions` pairs each candidate with its
/// participant index (`positions[i]` is position letter `A + i`).
#[must_use]
pub fn parse_ballot(voter: &str, text: &str, positions: &[String]) -> Option<ParsedBallot> {
    if let Some(ballot) = parse_json_stage(voter, text, positions) {
        return Some(ParsedBallot {
            ballot,
            stage: "json",
        });
    }
    if let Some(ballot) = parse_lines_stage(voter, text, positions) {
        return Some(ParsedBallot {
            ballot,
            stage: "lines",
        });
    }
    parse_keyword_stage(voter, text, positions).map(|ballot| ParsedBallot {
        ballot,
        stage: "keyword",
    })
}

/// Resolve a position token to a candidate: letter first, then name.
fn resolve(token: &str, positions: &[String]) -> Option<usize> {
    let token = token.trim().trim_matches(|c: char| !c.is_alphanumeric());
    if token.len() == 1 {
        let letter = token.chars().next()?.to_ascii_uppercase();
        let index = (letter as u8).checked_sub(b'A')? as usize;
        if index < positions.len() {
            return Some(index);
        }
        return None;
    }
    let lowered = token.to_lowercase();
    positions
        .iter()
        .position(|name| name.to_lowercase() == lowered)
}

/// Build a dense-ranked ballot from candidate indices in preference order.
fn ballot_from_order(
    voter: &str,
    order: &[usize],
    positions: &[String],
    rationale: HashMap<String, String>,
) -> Option<Ballot> {
    if order.is_empty() {
        return None;
    }
    let mut seen = Vec::new();
    let mut rankings = Vec::new();
    for &index in order {
        if seen.contains(&index) {
            continue;
        }
        seen.push(index);
        rankings.push(RankedCandidate {
            provider: positions[index].clone(),
            rank: rankings.len() + 1,
        });
    }
    Some(Ballot {
        voter: voter.to_string(),
        rankings,
        rationale,
    })
}

fn parse_json_stage(voter: &str, text: &str, positions: &[String]) -> Option<Ballot> {
    let candidate_json = fenced_json_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| balanced_object_containing(text, "rankings"));
    let parsed: JsonRankings = serde_json::from_str(&candidate_json?).ok()?;
    if parsed.rankings.is_empty() {
        return None;
    }

    let mut entries: Vec<(usize, usize, Option<String>)> = parsed
        .rankings
        .iter()
        .filter_map(|r| resolve(&r.position, positions).map(|i| (r.rank, i, r.reason.clone())))
        .collect();
    if entries.is_empty() {
        return None;
    }
    // Sort by the claimed rank; ties collapse by listing order.
    entries.sort_by_key(|(rank, _, _)| *rank);

    let mut rationale = HashMap::new();
    for (_, index, reason) in &entries {
        if let Some(reason) = reason {
            rationale.insert(positions[*index].clone(), reason.clone());
        }
    }
    let order: Vec<usize> = entries.iter().map(|(_, i, _)| *i).collect();
    ballot_from_order(voter, &order, positions, rationale)
}

/// Find the first balanced `{...}` substring containing `marker`.
fn balanced_object_containing(text: &str, marker: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(s) = start {
                        let object = &text[s..=i];
                        if object.contains(marker) {
                            return Some(object.to_string());
                        }
                        start = None;
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_lines_stage(voter: &str, text: &str, positions: &[String]) -> Option<Ballot> {
    let mut order = Vec::new();
    for capture in numbered_line_re().captures_iter(text) {
        let line = capture.get(1).map(|m| m.as_str())?;
        if let Some(index) = find_position_in_line(line, positions) {
            order.push(index);
        }
    }
    if order.len() < 2 {
        return None;
    }
    ballot_from_order(voter, &order, positions, HashMap::new())
}

fn find_position_in_line(line: &str, positions: &[String]) -> Option<usize> {
    // "Position A" / "Option B" style references win over bare letters.
    let lowered = line.to_lowercase();
    for (i, _) in positions.iter().enumerate() {
        let letter = position_letter(i).to_ascii_lowercase();
        if lowered.contains(&format!("position {letter}"))
            || lowered.contains(&format!("option {letter}"))
        {
            return Some(i);
        }
    }
    // Bare letter as its own word; uppercase only, so articles never match.
    for word in line.split(|c: char| !c.is_alphanumeric()) {
        if word.len() == 1 && word.chars().all(|c| c.is_ascii_uppercase()) {
            if let Some(index) = resolve(word, positions) {
                return Some(index);
            }
        }
    }
    // Provider name mention.
    positions
        .iter()
        .position(|name| lowered.contains(&name.to_lowercase()))
}

fn parse_keyword_stage(voter: &str, text: &str, positions: &[String]) -> Option<Ballot> {
    let sentence = keyword_re().find(text)?.as_str();
    let index = find_position_in_line(sentence, positions)?;
    // The named candidate leads; the rest follow in participant order.
    let mut order = vec![index];
    order.extend((0..positions.len()).filter(|i| *i != index));
    ballot_from_order(voter, &order, positions, HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions() -> Vec<String> {
        vec!["gpt".into(), "claude".into(), "gemini".into()]
    }

    #[test]
    fn test_json_stage_fenced_block() {
        let text = r#"My evaluation follows.

```json
{"rankings": [
  {"position": "B", "rank": 1, "reason": "most complete"},
  {"position": "A", "rank": 2},
  {"position": "C", "rank": 3}
]}
```"#;
        let parsed = parse_ballot("gpt", text, &positions()).unwrap();
        assert_eq!(parsed.stage, "json");
        assert_eq!(parsed.ballot.rankings[0].provider, "claude");
        assert_eq!(parsed.ballot.rankings[0].rank, 1);
        assert_eq!(
            parsed.ballot.rationale.get("claude").map(String::as_str),
            Some("most complete")
        );
    }

    #[test]
    fn test_json_stage_bare_object_with_tied_ranks() {
        // Ties collapse by listing order.
        let text = r#"{"rankings":[{"position":"A","rank":1},{"position":"C","rank":1},{"position":"B","rank":2}]}"#;
        let parsed = parse_ballot("v", text, &positions()).unwrap();
        let order: Vec<&str> = parsed
            .ballot
            .rankings
            .iter()
            .map(|r| r.provider.as_str())
            .collect();
        assert_eq!(order, vec!["gpt", "gemini", "claude"]);
        let ranks: Vec<usize> = parsed.ballot.rankings.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_lines_stage_with_letters_and_names() {
        let text = "My ranking:\n1. Position B - strongest evidence\n2) gemini came close\n3. A was shallow";
        let parsed = parse_ballot("v", text, &positions()).unwrap();
        assert_eq!(parsed.stage, "lines");
        let order: Vec<&str> = parsed
            .ballot
            .rankings
            .iter()
            .map(|r| r.provider.as_str())
            .collect();
        assert_eq!(order, vec!["claude", "gemini", "gpt"]);
    }

    #[test]
    fn test_keyword_stage_winner_only() {
        let text = "After reading everything, the winner is clearly position C here.";
        let parsed = parse_ballot("v", text, &positions()).unwrap();
        assert_eq!(parsed.stage, "keyword");
        assert_eq!(parsed.ballot.rankings[0].provider, "gemini");
        // Remaining candidates complete the ballot in participant order.
        assert_eq!(parsed.ballot.rankings.len(), 3);
        assert_eq!(parsed.ballot.rankings[1].provider, "gpt");
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(parse_ballot("v", "I abstain from ranking anyone.", &positions()).is_none());
        assert!(parse_ballot("v", "", &positions()).is_none());
    }

    #[test]
    fn test_duplicate_mentions_collapse() {
        let text = "1. B\n2. B again\n3. A\n4. C";
        let parsed = parse_ballot("v", text, &positions()).unwrap();
        let order: Vec<&str> = parsed
            .ballot
            .rankings
            .iter()
            .map(|r| r.provider.as_str())
            .collect();
        assert_eq!(order, vec!["claude", "gpt", "gemini"]);
    }

    #[test]
    fn test_position_letters() {
        assert_eq!(position_letter(0), 'A');
        assert_eq!(position_letter(2), 'C');
    }
}
