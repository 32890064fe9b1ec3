// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Phase data model and the canonical prompt templates.
//!
//! A phase is one named step of the pipeline with exactly one
//! [`PhaseOutput`]. Outputs keep responses in roster order, so persisted
//! state serializes deterministically given identical content, and carry the
//! per-participant prompt inputs so the attestation chain can be recomputed
//! from the session directory alone.

use crate::hashchain::PhaseRecord;
use crate::profile::ChallengeStyle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical phase names.
pub mod names {
    pub const GATHER: &str = "GATHER";
    pub const PLAN: &str = "PLAN";
    pub const FORMULATE: &str = "FORMULATE";
    pub const DEBATE: &str = "DEBATE";
    pub const ADJUST: &str = "ADJUST";
    pub const REBUTTAL: &str = "REBUTTAL";
    pub const VOTE: &str = "VOTE";
    pub const SYNTHESIZE: &str = "SYNTHESIZE";
    pub const RED_TEAM: &str = "RED_TEAM";
}

/// The prompt handed to one participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseInput {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
}

/// One participant's response (or its fallback stand-in).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseResponse {
    pub provider: String,
    pub text: String,
    /// True when retries were exhausted and a fallback was substituted.
    #[serde(default)]
    pub fallback: bool,
}

/// The complete, immutable record of one executed phase.
///
/// The responses list has exactly one entry per phase participant, in
/// participant (roster) order, never completion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseOutput {
    pub phase: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub inputs: Vec<PhaseInput>,
    pub responses: Vec<PhaseResponse>,
}

impl PhaseOutput {
    /// Response text for a participant, if present.
    #[must_use]
    pub fn response_for(&self, provider: &str) -> Option<&str> {
        self.responses
            .iter()
            .find(|r| r.provider == provider)
            .map(|r| r.text.as_str())
    }

    /// Reduce to the hashable record used by the chain and attestation.
    #[must_use]
    pub fn to_record(&self, provider_id: &str) -> PhaseRecord {
        PhaseRecord {
            phase: self.phase.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|i| (i.provider.clone(), i.prompt.clone()))
                .collect(),
            outputs: self
                .responses
                .iter()
                .map(|r| (r.provider.clone(), r.text.clone()))
                .collect(),
            provider_id: provider_id.to_string(),
            timestamp: self.timestamp.to_rfc3339(),
        }
    }
}

/// Everything a prompt template may draw on.
#[derive(Debug, Clone, Default)]
pub struct PromptCtx {
    pub input: String,
    pub phase: String,
    /// Debate round, 1-based.
    pub round: u32,
    pub participant: String,
    pub focus: Vec<String>,
    pub challenge_style: ChallengeStyle,
    /// `(label, text)` pairs this participant may read, visibility-filtered.
    pub visible: Vec<(String, String)>,
    /// Summary of similar prior deliberations, when memory retrieval hit.
    pub memory_context: Option<String>,
    /// Phase-specific extra material (attack vectors, vote instructions).
    pub extra: Option<String>,
}

impl PromptCtx {
    fn focus_clause(&self) -> String {
        if self.focus.is_empty() {
            String::new()
        } else {
            format!("\nPay particular attention to: {}.", self.focus.join(", "))
        }
    }

    fn visible_block(&self) -> String {
        if self.visible.is_empty() {
            return String::new();
        }
        let mut block = String::from("\n\n");
        for (label, text) in &self.visible {
            block.push_str(&format!("--- {label} ---\n{text}\n\n"));
        }
        block
    }
}

fn challenge_clause(style: ChallengeStyle) -> &'static str {
    match style {
        ChallengeStyle::Adversarial => {
            "Attack the weakest step of each argument directly. Name the flaw."
        }
        ChallengeStyle::Collaborative => {
            "Strengthen the best ideas you see and repair their gaps."
        }
        ChallengeStyle::Socratic => {
            "Challenge through pointed questions that expose hidden assumptions."
        }
    }
}

/// Default system prompt shared by the canonical phases.
#[must_use]
pub fn default_system(ctx: &PromptCtx) -> String {
    let memory = ctx
        .memory_context
        .as_deref()
        .map(|m| format!("\n\nRelevant prior deliberations:\n{m}"))
        .unwrap_or_default();
    format!(
        "You are {name}, one of several independent experts deliberating a question. \
         Be precise, commit to positions, and cite sources where you can.{memory}",
        name = ctx.participant
    )
}

/// Canonical user prompt for a phase name; engine and mesh topology share it.
#[must_use]
pub fn default_user(ctx: &PromptCtx) -> String {
    let question = &ctx.input;
    let focus = ctx.focus_clause();
    let others = ctx.visible_block();
    match ctx.phase.as_str() {
        names::GATHER => format!(
            "Question under deliberation:\n{question}\n\n\
             List the facts, definitions, and constraints needed to answer well. \
             Do not answer yet.{focus}"
        ),
        names::PLAN => format!(
            "Question:\n{question}\n\nFacts gathered so far:{others}\
             Outline the approach you will take to answer. Identify the decisive \
             considerations and the order you will address them.{focus}"
        ),
        names::FORMULATE => format!(
            "Question:\n{question}\n\nPlans on the table:{others}\
             Now give your full answer as a position statement. Number your key \
             claims and attach sources where possible.{focus}"
        ),
        names::DEBATE => format!(
            "Question:\n{question}\n\nPositions from the other participants \
             (round {round}):{others}\
             {challenge} Address at least two other positions by name.{focus}",
            round = ctx.round,
            challenge = challenge_clause(ctx.challenge_style),
        ),
        names::ADJUST => format!(
            "Question:\n{question}\n\nThe debate so far:{others}\
             Revise your position in light of the strongest challenges. State \
             explicitly what changed and what you still hold.{focus}"
        ),
        names::REBUTTAL => format!(
            "Question:\n{question}\n\nAdjusted positions:{others}\
             Give a final rebuttal to the points you still dispute. Be brief; \
             only genuine disagreements.{focus}"
        ),
        names::VOTE => format!(
            "Question:\n{question}\n\nFinal positions, anonymized:{others}\
             Rank every position from best to worst.\n{instructions}",
            instructions = ctx.extra.as_deref().unwrap_or(""),
        ),
        names::RED_TEAM => format!(
            "Question:\n{question}\n\nLeading positions:{others}\
             Attack these positions using the vectors below. Report every \
             weakness you can substantiate.\n{vectors}",
            vectors = ctx.extra.as_deref().unwrap_or(""),
        ),
        names::SYNTHESIZE => ctx.extra.clone().unwrap_or_else(|| question.clone()),
        other => format!("Question:\n{question}\n\nPhase {other}:{others}{focus}"),
    }
}

/// Session-file key for the Nth phase: `01-gather`, `04-debate`, with
/// `04-debate-r2` style keys for extra rounds.
#[must_use]
pub fn file_key(index: usize, phase: &str, round: u32) -> String {
    let slug = phase.to_lowercase().replace('_', "-");
    if round > 1 {
        format!("{:02}-{slug}-r{round}", index + 1)
    } else {
        format!("{:02}-{slug}", index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_keys() {
        assert_eq!(file_key(0, names::GATHER, 1), "01-gather");
        assert_eq!(file_key(3, names::DEBATE, 1), "04-debate");
        assert_eq!(file_key(3, names::DEBATE, 2), "04-debate-r2");
        assert_eq!(file_key(8, names::RED_TEAM, 1), "09-red-team");
    }

    #[test]
    fn test_gather_prompt_withholds_answering() {
        let ctx = PromptCtx {
            input: "Is Pluto a planet?".into(),
            phase: names::GATHER.into(),
            participant: "gpt".into(),
            ..Default::default()
        };
        let prompt = default_user(&ctx);
        assert!(prompt.contains("Pluto"));
        assert!(prompt.contains("Do not answer yet"));
    }

    #[test]
    fn test_debate_prompt_reflects_style_and_round() {
        let ctx = PromptCtx {
            input: "Q".into(),
            phase: names::DEBATE.into(),
            round: 2,
            challenge_style: ChallengeStyle::Socratic,
            visible: vec![("claude".into(), "a position".into())],
            ..Default::default()
        };
        let prompt = default_user(&ctx);
        assert!(prompt.contains("round 2"));
        assert!(prompt.contains("questions"));
        assert!(prompt.contains("--- claude ---"));
    }

    #[test]
    fn test_phase_output_roster_order_and_record() {
        let output = PhaseOutput {
            phase: names::GATHER.into(),
            timestamp: Utc::now(),
            duration_ms: 5,
            inputs: vec![
                PhaseInput {
                    provider: "a".into(),
                    system: None,
                    prompt: "pa".into(),
                },
                PhaseInput {
                    provider: "b".into(),
                    system: None,
                    prompt: "pb".into(),
                },
            ],
            responses: vec![
                PhaseResponse {
                    provider: "a".into(),
                    text: "ra".into(),
                    fallback: false,
                },
                PhaseResponse {
                    provider: "b".into(),
                    text: "[b failed to respond]".into(),
                    fallback: true,
                },
            ],
        };
        assert_eq!(output.response_for("a"), Some("ra"));
        assert_eq!(output.response_for("c"), None);

        let record = output.to_record("session-1");
        assert_eq!(record.inputs[0], ("a".into(), "pa".into()));
        assert_eq!(record.outputs[1].0, "b");
        assert_eq!(record.provider_id, "session-1");
    }

    #[test]
    fn test_memory_context_lands_in_system_prompt() {
        let ctx = PromptCtx {
            participant: "gpt".into(),
            memory_context: Some("2026-01-01: similar question, winner claude".into()),
            ..Default::default()
        };
        let system = default_system(&ctx);
        assert!(system.contains("prior deliberations"));
        assert!(system.contains("winner claude"));
    }
}
