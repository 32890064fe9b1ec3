// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Deliberation profiles and layered overrides.
//!
//! A profile describes how a deliberation should run: debate posture, round
//! counts, voting method, evidence mode, topology, checkpoints. Profiles are
//! immutable during a run; command-line flags produce a derived copy through
//! [`ProfileOverrides`] before the engine starts. Merge order is
//! builtin defaults ← profile file ← project config ← CLI flags, validated
//! once after the final layer.

use crate::adaptive::AdaptivePreset;
use crate::error::{QuorumError, Result};
use crate::voting::VotingMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// How challengers engage during debate phases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStyle {
    /// Attack weaknesses directly.
    #[default]
    Adversarial,
    /// Build on the strongest parts of other positions.
    Collaborative,
    /// Probe with questions rather than counter-claims.
    Socratic,
}

/// How much structural evidence discipline is applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    /// No claim extraction.
    #[default]
    Off,
    /// Score and report, but do not alter votes.
    Advisory,
    /// Scale vote contributions by evidence quality.
    Strict,
}

/// Human checkpoint requests carried by a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckpointConfig {
    /// Offer a checkpoint after each named phase.
    #[serde(default)]
    pub after_phases: Vec<String>,
    /// Offer a checkpoint after the vote tally.
    #[serde(default)]
    pub after_vote: bool,
    /// Offer a checkpoint when the normalized vote margin falls below
    /// `controversy_threshold`.
    #[serde(default)]
    pub on_controversy: bool,
    #[serde(default = "default_controversy_threshold")]
    pub controversy_threshold: f64,
}

fn default_controversy_threshold() -> f64 {
    0.2
}

/// A named deliberation recipe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    /// Topical emphases injected into phase prompts.
    #[serde(default)]
    pub focus: Vec<String>,
    #[serde(default)]
    pub challenge_style: ChallengeStyle,
    /// Debate rounds before adjustment.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Average pairwise term-Jaccard at or above which REBUTTAL is skipped.
    #[serde(default = "default_convergence")]
    pub convergence_threshold: f64,
    /// Explicit phase list; `None` means the topology's canonical phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<String>>,
    /// Role assignments required by some topologies (`hub`, `moderator`, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub roles: HashMap<String, String>,
    /// Per-phase prompt template overrides.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub prompts: HashMap<String, String>,
    /// Static per-provider vote weights.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub evidence: EvidenceMode,
    #[serde(default)]
    pub voting_method: VotingMethod,
    /// Shell hooks: `pre-<phase>` / `post-<phase>` → command line.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub hooks: HashMap<String, String>,
    /// Providers configured but excluded from this deliberation.
    #[serde(default)]
    pub exclude_from_deliberation: Vec<String>,
    /// Topology name; `None` means `mesh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<String>,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    /// Adaptive controller preset; `None` disables adaptive decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive: Option<AdaptivePreset>,
    /// Attack pack name; enables the red-team phase when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red_team: Option<String>,
    /// Multiply vote weights by arena reputation factors.
    #[serde(default)]
    pub reputation_weighting: bool,
    /// Evidence cross-validation similarity threshold.
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f64,
    /// Tool names advertised to adapters that support tool invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Permit the `shell` tool when a backend offers it.
    #[serde(default)]
    pub allow_shell_tool: bool,
}

fn default_rounds() -> u32 {
    1
}

fn default_convergence() -> f64 {
    0.8
}

fn default_similarity() -> f64 {
    0.35
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "balanced".into(),
            focus: Vec::new(),
            challenge_style: ChallengeStyle::default(),
            rounds: default_rounds(),
            convergence_threshold: default_convergence(),
            phases: None,
            roles: HashMap::new(),
            prompts: HashMap::new(),
            weights: HashMap::new(),
            evidence: EvidenceMode::default(),
            voting_method: VotingMethod::default(),
            hooks: HashMap::new(),
            exclude_from_deliberation: Vec::new(),
            topology: None,
            checkpoints: CheckpointConfig::default(),
            adaptive: None,
            red_team: None,
            reputation_weighting: false,
            similarity_threshold: default_similarity(),
            tools: Vec::new(),
            allow_shell_tool: false,
        }
    }
}

impl AgentProfile {
    /// Load a named profile from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuorumError::Config(format!("cannot read {}: {e}", path.display())))?;
        let profile: Self = serde_yml::from_str(&text)
            .map_err(|e| QuorumError::Config(format!("invalid profile {}: {e}", path.display())))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Validate ranges once after all override layers have been applied.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.convergence_threshold) {
            return Err(QuorumError::Validation(format!(
                "convergence_threshold {} outside [0,1]",
                self.convergence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(QuorumError::Validation(format!(
                "similarity_threshold {} outside [0,1]",
                self.similarity_threshold
            )));
        }
        if self.rounds == 0 || self.rounds > 5 {
            return Err(QuorumError::Validation(format!(
                "rounds {} outside 1..=5",
                self.rounds
            )));
        }
        for (provider, weight) in &self.weights {
            if *weight < 0.0 {
                return Err(QuorumError::Validation(format!(
                    "negative weight {weight} for provider '{provider}'"
                )));
            }
        }
        if self.tools.iter().any(|t| t == "shell") && !self.allow_shell_tool {
            return Err(QuorumError::Validation(
                "the shell tool requires allow_shell_tool: true".into(),
            ));
        }
        Ok(())
    }

    /// Produce a derived copy with CLI overrides applied, then re-validate.
    pub fn with_overrides(&self, overrides: &ProfileOverrides) -> Result<Self> {
        let mut profile = self.clone();
        overrides.apply(&mut profile);
        profile.validate()?;
        Ok(profile)
    }
}

/// Optional field-by-field overrides, applied left-to-right over a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    pub rounds: Option<u32>,
    pub convergence_threshold: Option<f64>,
    pub challenge_style: Option<ChallengeStyle>,
    pub evidence: Option<EvidenceMode>,
    pub voting_method: Option<VotingMethod>,
    pub topology: Option<String>,
    pub adaptive: Option<AdaptivePreset>,
    pub red_team: Option<String>,
    pub reputation_weighting: Option<bool>,
    pub exclude: Vec<String>,
}

impl ProfileOverrides {
    fn apply(&self, profile: &mut AgentProfile) {
        if let Some(rounds) = self.rounds {
            profile.rounds = rounds;
        }
        if let Some(threshold) = self.convergence_threshold {
            profile.convergence_threshold = threshold;
        }
        if let Some(style) = self.challenge_style {
            profile.challenge_style = style;
        }
        if let Some(evidence) = self.evidence {
            profile.evidence = evidence;
        }
        if let Some(method) = self.voting_method {
            profile.voting_method = method;
        }
        if let Some(topology) = &self.topology {
            profile.topology = Some(topology.clone());
        }
        if let Some(preset) = self.adaptive {
            profile.adaptive = Some(preset);
        }
        if let Some(pack) = &self.red_team {
            profile.red_team = Some(pack.clone());
        }
        if let Some(reputation) = self.reputation_weighting {
            profile.reputation_weighting = reputation;
        }
        profile
            .exclude_from_deliberation
            .extend(self.exclude.iter().cloned());
    }
}
