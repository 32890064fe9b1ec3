// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Adaptive phase control from cross-response entropy.
//!
//! After each phase the controller clusters responses into content bags
//! (whitespace token sets, Jaccard >= 0.5 joins a cluster) and computes the
//! normalized Shannon entropy of the cluster weights. Low entropy means the
//! roster already agrees; high entropy means positions are still far apart.
//! Decisions are deterministic given identical responses and preset.
//!
//! Skip decisions affect only phases that have not started.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::phases::names;

/// Threshold presets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdaptivePreset {
    /// Converge aggressively; skip early.
    Fast,
    #[default]
    Balanced,
    /// Keep deliberating unless agreement is overwhelming.
    Critical,
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    /// Below this, jump straight to vote + synthesis.
    synthesize_below: f64,
    /// Below this, drop optional later phases.
    skip_below: f64,
    /// At or above this after a debate, add another round.
    add_round_above: f64,
}

impl AdaptivePreset {
    fn thresholds(self) -> Thresholds {
        match self {
            AdaptivePreset::Fast => Thresholds {
                synthesize_below: 0.15,
                skip_below: 0.35,
                add_round_above: 0.90,
            },
            AdaptivePreset::Balanced => Thresholds {
                synthesize_below: 0.10,
                skip_below: 0.25,
                add_round_above: 0.75,
            },
            AdaptivePreset::Critical => Thresholds {
                synthesize_below: 0.05,
                skip_below: 0.15,
                add_round_above: 0.60,
            },
        }
    }
}

/// What the engine should do next.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum AdaptiveAction {
    Continue,
    /// Remove these not-yet-started phases.
    SkipPhases { phases: Vec<String> },
    /// Run one more debate round (engine caps at two extras).
    AddRound,
    /// Drop every remaining phase except vote and synthesis.
    SkipToSynthesize,
}

/// One recorded decision, persisted to `adaptive-decisions.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptiveDecision {
    pub phase: String,
    #[serde(flatten)]
    pub action: AdaptiveAction,
    pub entropy: f64,
    pub reason: String,
}

/// Phases the controller may remove on low entropy.
const SKIPPABLE: &[&str] = &[names::REBUTTAL];

/// Stateful controller; `rounds_added` enforces the two-extra-rounds cap.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    preset: AdaptivePreset,
    rounds_added: u32,
}

/// Hard cap on extra debate rounds.
pub const MAX_EXTRA_ROUNDS: u32 = 2;

impl AdaptiveController {
    #[must_use]
    pub fn new(preset: AdaptivePreset) -> Self {
        Self {
            preset,
            rounds_added: 0,
        }
    }

    /// Evaluate a completed phase. `remaining` lists phases not yet started,
    /// in order.
    pub fn evaluate(
        &mut self,
        phase: &str,
        responses: &[String],
        remaining: &[String],
    ) -> AdaptiveDecision {
        let entropy = response_entropy(responses);
        let thresholds = self.preset.thresholds();

        let deliberative_remaining: Vec<String> = remaining
            .iter()
            .filter(|p| p.as_str() != names::VOTE && p.as_str() != names::SYNTHESIZE)
            .cloned()
            .collect();

        if entropy <= thresholds.synthesize_below && !deliberative_remaining.is_empty() {
            return AdaptiveDecision {
                phase: phase.to_string(),
                action: AdaptiveAction::SkipToSynthesize,
                entropy,
                reason: format!(
                    "entropy {entropy:.3} <= {:.2}; responses have converged",
                    thresholds.synthesize_below
                ),
            };
        }

        if entropy <= thresholds.skip_below {
            let skippable: Vec<String> = remaining
                .iter()
                .filter(|p| SKIPPABLE.contains(&p.as_str()))
                .cloned()
                .collect();
            if !skippable.is_empty() {
                return AdaptiveDecision {
                    phase: phase.to_string(),
                    action: AdaptiveAction::SkipPhases { phases: skippable },
                    entropy,
                    reason: format!(
                        "entropy {entropy:.3} <= {:.2}; optional phases add little",
                        thresholds.skip_below
                    ),
                };
            }
        }

        if phase == names::DEBATE
            && entropy >= thresholds.add_round_above
            && self.rounds_added < MAX_EXTRA_ROUNDS
        {
            self.rounds_added += 1;
            return AdaptiveDecision {
                phase: phase.to_string(),
                action: AdaptiveAction::AddRound,
                entropy,
                reason: format!(
                    "entropy {entropy:.3} >= {:.2}; positions still far apart (extra round {}/{MAX_EXTRA_ROUNDS})",
                    thresholds.add_round_above, self.rounds_added
                ),
            };
        }

        AdaptiveDecision {
            phase: phase.to_string(),
            action: AdaptiveAction::Continue,
            entropy,
            reason: format!("entropy {entropy:.3} within normal band"),
        }
    }
}

fn token_bag(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Normalized Shannon entropy over content-bag clusters.
///
/// 0.0 when every response lands in one cluster, 1.0 when all differ.
#[must_use]
pub fn response_entropy(responses: &[String]) -> f64 {
    if responses.len() <= 1 {
        return 0.0;
    }
    let mut clusters: Vec<(BTreeSet<String>, usize)> = Vec::new();
    for response in responses {
        let bag = token_bag(response);
        match clusters.iter_mut().find(|(rep, _)| jaccard(rep, &bag) >= 0.5) {
            Some((_, count)) => *count += 1,
            None => clusters.push((bag, 1)),
        }
    }
    if clusters.len() <= 1 {
        return 0.0;
    }
    let total = responses.len() as f64;
    let entropy: f64 = clusters
        .iter()
        .map(|(_, count)| {
            let p = *count as f64 / total;
            -p * p.ln()
        })
        .sum();
    entropy / total.ln()
}

/// Average pairwise term-set Jaccard across responses; the convergence
/// signal compared against a profile's `convergence_threshold`.
#[must_use]
pub fn convergence(responses: &[String]) -> f64 {
    if responses.len() < 2 {
        return 1.0;
    }
    let bags: Vec<BTreeSet<String>> = responses.iter().map(|r| token_bag(r)).collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..bags.len() {
        for j in (i + 1)..bags.len() {
            total += jaccard(&bags[i], &bags[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_identical_responses_have_zero_entropy() {
        let responses = strings(&["rust is safe and fast", "rust is safe and fast"]);
        assert_eq!(response_entropy(&responses), 0.0);
    }

    #[test]
    fn test_disjoint_responses_have_max_entropy() {
        let responses = strings(&["alpha beta gamma", "delta epsilon zeta", "eta theta iota"]);
        let entropy = response_entropy(&responses);
        assert!((entropy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let responses = strings(&["one two three", "four five six"]);
        let remaining = strings(&[names::REBUTTAL, names::VOTE, names::SYNTHESIZE]);
        let first = AdaptiveController::new(AdaptivePreset::Balanced).evaluate(
            names::ADJUST,
            &responses,
            &remaining,
        );
        let second = AdaptiveController::new(AdaptivePreset::Balanced).evaluate(
            names::ADJUST,
            &responses,
            &remaining,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_low_entropy_skips_to_synthesize() {
        let responses = strings(&["same answer here", "same answer here", "same answer here"]);
        let remaining = strings(&[names::ADJUST, names::REBUTTAL, names::VOTE, names::SYNTHESIZE]);
        let decision = AdaptiveController::new(AdaptivePreset::Balanced).evaluate(
            names::DEBATE,
            &responses,
            &remaining,
        );
        assert_eq!(decision.action, AdaptiveAction::SkipToSynthesize);
        assert_eq!(decision.entropy, 0.0);
    }

    #[test]
    fn test_high_entropy_adds_rounds_up_to_cap() {
        let responses = strings(&["alpha beta", "gamma delta", "epsilon zeta"]);
        let remaining = strings(&[names::ADJUST, names::VOTE, names::SYNTHESIZE]);
        let mut controller = AdaptiveController::new(AdaptivePreset::Critical);

        for _ in 0..MAX_EXTRA_ROUNDS {
            let decision = controller.evaluate(names::DEBATE, &responses, &remaining);
            assert_eq!(decision.action, AdaptiveAction::AddRound);
        }
        // Cap reached: no third extra round.
        let decision = controller.evaluate(names::DEBATE, &responses, &remaining);
        assert_eq!(decision.action, AdaptiveAction::Continue);
    }

    #[test]
    fn test_moderate_entropy_skips_rebuttal_only() {
        // Four of five agree: entropy sits in the skip band for Fast
        // (two clusters weighted 4/5 and 1/5 give ~0.31 normalized).
        let responses = strings(&[
            "the answer is rust because safety",
            "the answer is rust because safety",
            "the answer is rust because safety",
            "the answer is rust because safety",
            "prefer go for simplicity reasons instead",
        ]);
        let remaining = strings(&[names::REBUTTAL, names::VOTE, names::SYNTHESIZE]);
        let decision = AdaptiveController::new(AdaptivePreset::Fast).evaluate(
            names::ADJUST,
            &responses,
            &remaining,
        );
        match &decision.action {
            AdaptiveAction::SkipPhases { phases } => {
                assert_eq!(phases, &vec![names::REBUTTAL.to_string()]);
            }
            other => panic!("expected SkipPhases, got {other:?}"),
        }
    }

    #[test]
    fn test_convergence_bounds() {
        assert_eq!(convergence(&strings(&["only one"])), 1.0);
        let same = strings(&["a b c", "a b c"]);
        assert!((convergence(&same) - 1.0).abs() < 1e-9);
        let disjoint = strings(&["a b c", "x y z"]);
        assert_eq!(convergence(&disjoint), 0.0);
    }
}
