// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Ranked-ballot tallying.
//!
//! Four methods over the same ballot shape: Borda (the weighted default),
//! instant-runoff, approval, and Condorcet with Borda fallback. Provider
//! weights and the self-vote discount apply to Borda point awards; the other
//! methods count unweighted ballots, with Borda as the secondary sort where
//! a method needs a tie-break.
//!
//! A result is *controversial* iff the top two scores differ by at most 1.0
//! under the chosen method.

mod parse;

pub use parse::{parse_ballot, position_letter, ParsedBallot};

use crate::error::{QuorumError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tally algorithm selector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    #[default]
    Borda,
    InstantRunoff,
    Approval,
    Condorcet,
}

impl std::fmt::Display for VotingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VotingMethod::Borda => "borda",
            VotingMethod::InstantRunoff => "instant_runoff",
            VotingMethod::Approval => "approval",
            VotingMethod::Condorcet => "condorcet",
        };
        write!(f, "{name}")
    }
}

/// One candidate at one rank on a ballot. Ranks are 1-based and dense.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedCandidate {
    pub provider: String,
    pub rank: usize,
}

/// A single voter's ranking over the candidate set. Ties are not
/// representable; parsers collapse them by line order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ballot {
    pub voter: String,
    pub rankings: Vec<RankedCandidate>,
    /// Free-text reasons the voter attached, keyed by candidate.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rationale: HashMap<String, String>,
}

impl Ballot {
    #[must_use]
    pub fn new(voter: impl Into<String>, ordered: &[&str]) -> Self {
        Self {
            voter: voter.into(),
            rankings: ordered
                .iter()
                .enumerate()
                .map(|(i, provider)| RankedCandidate {
                    provider: (*provider).to_string(),
                    rank: i + 1,
                })
                .collect(),
            rationale: HashMap::new(),
        }
    }

    /// Rank of a candidate on this ballot, if ranked.
    #[must_use]
    pub fn rank_of(&self, provider: &str) -> Option<usize> {
        self.rankings
            .iter()
            .find(|r| r.provider == provider)
            .map(|r| r.rank)
    }
}

/// A candidate with its method-specific score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCandidate {
    pub provider: String,
    pub score: f64,
}

/// Per-candidate audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CandidateDetail {
    /// Every rank this candidate received, in ballot order.
    pub ranks: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Outcome of a tally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteResult {
    /// Candidates best-first with method-specific scores.
    pub rankings: Vec<ScoredCandidate>,
    pub winner: String,
    pub controversial: bool,
    pub method: VotingMethod,
    pub details: BTreeMap<String, CandidateDetail>,
    /// Method annotations, e.g. the Condorcet fallback note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_details: Option<String>,
}

impl VoteResult {
    /// The runner-up, when there is one.
    #[must_use]
    pub fn runner_up(&self) -> Option<&str> {
        self.rankings.get(1).map(|c| c.provider.as_str())
    }
}

/// Knobs applied during tallying.
#[derive(Debug, Clone)]
pub struct TallyOptions {
    /// Per-candidate multiplicative weights (profile × reputation ×
    /// evidence). Missing candidates weigh 1.0.
    pub weights: HashMap<String, f64>,
    /// Multiplier on points a voter awards to itself.
    pub self_discount: f64,
}

impl Default for TallyOptions {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            self_discount: 0.5,
        }
    }
}

impl TallyOptions {
    fn weight(&self, candidate: &str) -> f64 {
        self.weights.get(candidate).copied().unwrap_or(1.0)
    }

    fn discount(&self, voter: &str, candidate: &str) -> f64 {
        if voter == candidate {
            self.self_discount
        } else {
            1.0
        }
    }
}

/// Tally ballots with the chosen method.
pub fn tally(
    method: VotingMethod,
    ballots: &[Ballot],
    candidates: &[String],
    options: &TallyOptions,
) -> Result<VoteResult> {
    if candidates.len() < 2 {
        return Err(QuorumError::Validation(
            "tally requires at least two candidates".into(),
        ));
    }
    if ballots.is_empty() {
        return Err(QuorumError::Parse("no parseable ballots".into()));
    }
    let mut result = match method {
        VotingMethod::Borda => borda(ballots, candidates, options),
        VotingMethod::InstantRunoff => instant_runoff(ballots, candidates),
        VotingMethod::Approval => approval(ballots, candidates, options),
        VotingMethod::Condorcet => condorcet(ballots, candidates, options),
    };
    result.details = details(ballots, candidates);
    Ok(result)
}

fn details(ballots: &[Ballot], candidates: &[String]) -> BTreeMap<String, CandidateDetail> {
    let mut map = BTreeMap::new();
    for candidate in candidates {
        let mut detail = CandidateDetail::default();
        for ballot in ballots {
            if let Some(rank) = ballot.rank_of(candidate) {
                detail.ranks.push(rank);
            }
            if let Some(reason) = ballot.rationale.get(candidate) {
                let rationale = detail.rationale.get_or_insert_with(String::new);
                if !rationale.is_empty() {
                    rationale.push_str("; ");
                }
                rationale.push_str(reason);
            }
        }
        map.insert(candidate.clone(), detail);
    }
    map
}

fn finish(
    mut scores: Vec<ScoredCandidate>,
    method: VotingMethod,
    voting_details: Option<String>,
) -> VoteResult {
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.provider.cmp(&b.provider))
    });
    let winner = scores.first().map(|c| c.provider.clone()).unwrap_or_default();
    let controversial = match (scores.first(), scores.get(1)) {
        (Some(first), Some(second)) => (first.score - second.score).abs() <= 1.0,
        _ => false,
    };
    VoteResult {
        rankings: scores,
        winner,
        controversial,
        method,
        details: BTreeMap::new(),
        voting_details,
    }
}

/// Raw Borda points per candidate, weights and self-discount applied.
fn borda_points(
    ballots: &[Ballot],
    candidates: &[String],
    options: &TallyOptions,
) -> HashMap<String, f64> {
    let n = candidates.len();
    let mut points: HashMap<String, f64> =
        candidates.iter().map(|c| (c.clone(), 0.0)).collect();
    for ballot in ballots {
        for candidate in candidates {
            if let Some(rank) = ballot.rank_of(candidate) {
                let award = (n.saturating_sub(rank)) as f64
                    * options.weight(candidate)
                    * options.discount(&ballot.voter, candidate);
                if let Some(entry) = points.get_mut(candidate) {
                    *entry += award;
                }
            }
        }
    }
    points
}

fn borda(ballots: &[Ballot], candidates: &[String], options: &TallyOptions) -> VoteResult {
    let points = borda_points(ballots, candidates, options);
    let scores = candidates
        .iter()
        .map(|c| ScoredCandidate {
            provider: c.clone(),
            score: points.get(c).copied().unwrap_or(0.0),
        })
        .collect();
    finish(scores, VotingMethod::Borda, None)
}

fn instant_runoff(ballots: &[Ballot], candidates: &[String]) -> VoteResult {
    let mut active: Vec<String> = candidates.to_vec();
    let mut eliminated: Vec<(String, f64)> = Vec::new();

    let first_pref_counts = |active: &[String]| -> HashMap<String, f64> {
        let mut counts: HashMap<String, f64> =
            active.iter().map(|c| (c.clone(), 0.0)).collect();
        for ballot in ballots {
            // Highest-ranked still-active candidate gets the vote.
            let choice = ballot
                .rankings
                .iter()
                .filter(|r| active.contains(&r.provider))
                .min_by_key(|r| r.rank);
            if let Some(choice) = choice {
                if let Some(count) = counts.get_mut(&choice.provider) {
                    *count += 1.0;
                }
            }
        }
        counts
    };

    loop {
        let counts = first_pref_counts(&active);
        let total: f64 = counts.values().sum();
        let leader = active
            .iter()
            .max_by(|a, b| {
                counts[*a]
                    .partial_cmp(&counts[*b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned();
        if let Some(leader) = leader {
            if counts[&leader] * 2.0 > total || active.len() <= 2 {
                // Survivors first by final count, then eliminated in
                // reverse elimination order.
                let mut survivors: Vec<ScoredCandidate> = active
                    .iter()
                    .map(|c| ScoredCandidate {
                        provider: c.clone(),
                        score: counts[c],
                    })
                    .collect();
                survivors.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.provider.cmp(&b.provider))
                });
                let mut scores = survivors;
                for (provider, score) in eliminated.iter().rev() {
                    scores.push(ScoredCandidate {
                        provider: provider.clone(),
                        score: *score,
                    });
                }
                let winner = scores[0].provider.clone();
                let controversial = scores
                    .get(1)
                    .is_some_and(|second| (scores[0].score - second.score).abs() <= 1.0);
                return VoteResult {
                    rankings: scores,
                    winner,
                    controversial,
                    method: VotingMethod::InstantRunoff,
                    details: BTreeMap::new(),
                    voting_details: None,
                };
            }
        }
        // Eliminate the fewest-first-preferences candidate; ties drop the
        // later roster entry so the outcome is deterministic.
        let loser = active
            .iter()
            .enumerate()
            .min_by(|(ai, a), (bi, b)| {
                counts[*a]
                    .partial_cmp(&counts[*b])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| bi.cmp(ai))
            })
            .map(|(_, c)| c.clone());
        match loser {
            Some(loser) => {
                eliminated.push((loser.clone(), counts[&loser]));
                active.retain(|c| c != &loser);
            }
            None => break,
        }
    }
    // Unreachable with >= 2 candidates; satisfy the type.
    finish(Vec::new(), VotingMethod::InstantRunoff, None)
}

fn approval(ballots: &[Ballot], candidates: &[String], options: &TallyOptions) -> VoteResult {
    let n = candidates.len();
    let approve_top = n.div_ceil(2);
    let mut approvals: HashMap<String, f64> =
        candidates.iter().map(|c| (c.clone(), 0.0)).collect();
    for ballot in ballots {
        for ranked in &ballot.rankings {
            if ranked.rank <= approve_top {
                if let Some(count) = approvals.get_mut(&ranked.provider) {
                    *count += 1.0;
                }
            }
        }
    }
    // Borda as the secondary sort between equal approval counts.
    let borda = borda_points(ballots, candidates, options);
    let mut scores: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|c| ScoredCandidate {
            provider: c.clone(),
            score: approvals.get(c).copied().unwrap_or(0.0),
        })
        .collect();
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                borda
                    .get(&b.provider)
                    .partial_cmp(&borda.get(&a.provider))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.provider.cmp(&b.provider))
    });
    let winner = scores[0].provider.clone();
    let controversial = scores
        .get(1)
        .is_some_and(|second| (scores[0].score - second.score).abs() <= 1.0);
    VoteResult {
        rankings: scores,
        winner,
        controversial,
        method: VotingMethod::Approval,
        details: BTreeMap::new(),
        voting_details: None,
    }
}

fn condorcet(ballots: &[Ballot], candidates: &[String], options: &TallyOptions) -> VoteResult {
    let n = candidates.len();
    // pairwise[i][j] = ballots preferring i over j. Unranked counts as worst.
    let mut wins: HashMap<&str, usize> = candidates.iter().map(|c| (c.as_str(), 0)).collect();
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let (a, b) = (&candidates[i], &candidates[j]);
            let mut prefer_a = 0usize;
            let mut prefer_b = 0usize;
            for ballot in ballots {
                let ra = ballot.rank_of(a).unwrap_or(usize::MAX);
                let rb = ballot.rank_of(b).unwrap_or(usize::MAX);
                if ra < rb {
                    prefer_a += 1;
                } else if rb < ra {
                    prefer_b += 1;
                }
            }
            if prefer_a > prefer_b {
                if let Some(w) = wins.get_mut(a.as_str()) {
                    *w += 1;
                }
            }
        }
    }

    let condorcet_winner = candidates
        .iter()
        .find(|c| wins.get(c.as_str()).copied().unwrap_or(0) == n - 1);

    match condorcet_winner {
        Some(_) => {
            // Secondary ranking by pairwise win count.
            let scores = candidates
                .iter()
                .map(|c| ScoredCandidate {
                    provider: c.clone(),
                    score: wins.get(c.as_str()).copied().unwrap_or(0) as f64,
                })
                .collect();
            finish(scores, VotingMethod::Condorcet, None)
        }
        None => {
            let points = borda_points(ballots, candidates, options);
            let scores = candidates
                .iter()
                .map(|c| ScoredCandidate {
                    provider: c.clone(),
                    score: points.get(c).copied().unwrap_or(0.0),
                })
                .collect();
            finish(
                scores,
                VotingMethod::Condorcet,
                Some("no Condorcet winner; fell back to Borda scoring".into()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_borda_basic_ordering() {
        let c = candidates(&["a", "b", "c"]);
        let ballots = vec![
            Ballot::new("v1", &["a", "b", "c"]),
            Ballot::new("v2", &["a", "c", "b"]),
            Ballot::new("v3", &["b", "a", "c"]),
        ];
        let result = tally(VotingMethod::Borda, &ballots, &c, &TallyOptions::default()).unwrap();
        assert_eq!(result.winner, "a");
        assert_eq!(result.details["a"].ranks, vec![1, 1, 2]);
    }

    #[test]
    fn test_borda_symmetric_self_votes_tie() {
        // Each provider ranks itself first, cyclically. Self-discount 0.5
        // makes every score 2.0: a three-way tie, hence controversial.
        let c = candidates(&["a", "b", "c"]);
        let ballots = vec![
            Ballot::new("a", &["a", "b", "c"]),
            Ballot::new("b", &["b", "c", "a"]),
            Ballot::new("c", &["c", "a", "b"]),
        ];
        let result = tally(VotingMethod::Borda, &ballots, &c, &TallyOptions::default()).unwrap();
        let scores: Vec<f64> = result.rankings.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![2.0, 2.0, 2.0]);
        assert!(result.controversial);
    }

    #[test]
    fn test_borda_monotonicity() {
        let c = candidates(&["a", "b", "c"]);
        let base = vec![
            Ballot::new("v1", &["b", "a", "c"]),
            Ballot::new("v2", &["c", "b", "a"]),
        ];
        let before = tally(VotingMethod::Borda, &base, &c, &TallyOptions::default()).unwrap();
        let rank_before = before
            .rankings
            .iter()
            .position(|r| r.provider == "a")
            .unwrap();

        // Raise `a` on v1 without touching the other ballot.
        let raised = vec![
            Ballot::new("v1", &["a", "b", "c"]),
            Ballot::new("v2", &["c", "b", "a"]),
        ];
        let after = tally(VotingMethod::Borda, &raised, &c, &TallyOptions::default()).unwrap();
        let rank_after = after
            .rankings
            .iter()
            .position(|r| r.provider == "a")
            .unwrap();
        assert!(rank_after <= rank_before);
    }

    #[test]
    fn test_self_discount_never_hurts_opponent() {
        let c = candidates(&["a", "b"]);
        let with_self = vec![Ballot::new("a", &["a", "b"]), Ballot::new("b", &["a", "b"])];
        let without_self = vec![Ballot::new("a", &["b"]), Ballot::new("b", &["a", "b"])];
        let options = TallyOptions::default();
        let b_with = tally(VotingMethod::Borda, &with_self, &c, &options)
            .unwrap()
            .rankings
            .iter()
            .find(|r| r.provider == "b")
            .map(|r| r.score)
            .unwrap_or(0.0);
        let b_without = tally(VotingMethod::Borda, &without_self, &c, &options)
            .unwrap()
            .rankings
            .iter()
            .find(|r| r.provider == "b")
            .map(|r| r.score)
            .unwrap_or(0.0);
        assert!(b_without >= b_with);
    }

    #[test]
    fn test_instant_runoff_elimination_and_majority() {
        let c = candidates(&["a", "b", "c"]);
        // c has fewest first preferences and transfers to b.
        let ballots = vec![
            Ballot::new("v1", &["a", "b", "c"]),
            Ballot::new("v2", &["a", "c", "b"]),
            Ballot::new("v3", &["b", "a", "c"]),
            Ballot::new("v4", &["b", "a", "c"]),
            Ballot::new("v5", &["c", "b", "a"]),
        ];
        let result = tally(
            VotingMethod::InstantRunoff,
            &ballots,
            &c,
            &TallyOptions::default(),
        )
        .unwrap();
        assert_eq!(result.winner, "b");
        // Eliminated candidate ranks last.
        assert_eq!(result.rankings.last().unwrap().provider, "c");
    }

    #[test]
    fn test_approval_ceil_half_and_borda_tiebreak() {
        let c = candidates(&["a", "b", "c", "d"]);
        // Top 2 of 4 are approved.
        let ballots = vec![
            Ballot::new("v1", &["a", "b", "c", "d"]),
            Ballot::new("v2", &["b", "a", "d", "c"]),
            Ballot::new("v3", &["a", "b", "d", "c"]),
        ];
        let result =
            tally(VotingMethod::Approval, &ballots, &c, &TallyOptions::default()).unwrap();
        assert_eq!(result.rankings[0].score, 3.0); // a and b approved thrice
        assert_eq!(result.rankings[1].score, 3.0);
        // Borda breaks the approval tie in favor of `a` (two firsts).
        assert_eq!(result.winner, "a");
    }

    #[test]
    fn test_condorcet_winner_found() {
        let c = candidates(&["a", "b", "c"]);
        let ballots = vec![
            Ballot::new("v1", &["a", "b", "c"]),
            Ballot::new("v2", &["a", "c", "b"]),
            Ballot::new("v3", &["b", "a", "c"]),
        ];
        let result =
            tally(VotingMethod::Condorcet, &ballots, &c, &TallyOptions::default()).unwrap();
        assert_eq!(result.winner, "a");
        assert!(result.voting_details.is_none());
        assert_eq!(result.rankings[0].score, 2.0); // beats both others
    }

    #[test]
    fn test_condorcet_cycle_falls_back_to_borda() {
        let c = candidates(&["a", "b", "c"]);
        // Rock-paper-scissors cycle.
        let ballots = vec![
            Ballot::new("v1", &["a", "b", "c"]),
            Ballot::new("v2", &["b", "c", "a"]),
            Ballot::new("v3", &["c", "a", "b"]),
        ];
        let result =
            tally(VotingMethod::Condorcet, &ballots, &c, &TallyOptions::default()).unwrap();
        assert_eq!(result.method, VotingMethod::Condorcet);
        assert!(result
            .voting_details
            .as_deref()
            .unwrap()
            .contains("no Condorcet winner"));
        let borda = tally(VotingMethod::Borda, &ballots, &c, &TallyOptions::default()).unwrap();
        assert_eq!(result.winner, borda.winner);
    }

    #[test]
    fn test_tally_rejects_degenerate_inputs() {
        let one = candidates(&["a"]);
        assert!(tally(
            VotingMethod::Borda,
            &[Ballot::new("v", &["a"])],
            &one,
            &TallyOptions::default()
        )
        .is_err());
        let two = candidates(&["a", "b"]);
        assert!(tally(VotingMethod::Borda, &[], &two, &TallyOptions::default()).is_err());
    }

    #[test]
    fn test_weights_scale_borda_awards() {
        let c = candidates(&["a", "b"]);
        let ballots = vec![Ballot::new("v1", &["b", "a"]), Ballot::new("v2", &["a", "b"])];
        let mut options = TallyOptions::default();
        options.weights.insert("a".into(), 2.0);
        let result = tally(VotingMethod::Borda, &ballots, &c, &options).unwrap();
        assert_eq!(result.winner, "a");
    }
}
