// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum ask` - run one deliberation and print the synthesis.

use crate::helpers::Environment;
use crate::output::{self, ConsoleSink};
use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use quorum::adaptive::AdaptivePreset;
use quorum::engine::EngineOptions;
use quorum::profile::{EvidenceMode, ProfileOverrides};
use quorum::voting::VotingMethod;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Args)]
pub struct AskArgs {
    /// The question to deliberate
    pub question: String,

    /// Profile name (from <base-dir>/profiles/)
    #[arg(long, short = 'p')]
    pub profile: Option<String>,

    /// Topology: mesh, star, tournament, map_reduce, adversarial_tree,
    /// pipeline, panel
    #[arg(long)]
    pub topology: Option<String>,

    /// Debate rounds before adjustment
    #[arg(long)]
    pub rounds: Option<u32>,

    /// Voting method: borda, instant_runoff, approval, condorcet
    #[arg(long)]
    pub voting: Option<String>,

    /// Evidence mode: off, advisory, strict
    #[arg(long)]
    pub evidence: Option<String>,

    /// Adaptive preset: fast, balanced, critical
    #[arg(long)]
    pub adaptive: Option<String>,

    /// Red-team attack pack name (e.g. "general")
    #[arg(long)]
    pub red_team: Option<String>,

    /// Exclude a configured provider (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Skip memory-graph retrieval
    #[arg(long)]
    pub no_memory: bool,

    /// Evaluate only this policy
    #[arg(long)]
    pub policy: Option<String>,

    /// Weight votes by arena reputation
    #[arg(long)]
    pub reputation: bool,

    /// Show per-provider progress
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Parse an enum-ish flag through its serde names.
fn parse_flag<T: serde::de::DeserializeOwned>(kind: &str, value: &str) -> Result<T> {
    serde_yml::from_str(value).map_err(|_| anyhow!("invalid {kind} '{value}'"))
}

pub fn overrides(args: &AskArgs) -> Result<ProfileOverrides> {
    Ok(ProfileOverrides {
        rounds: args.rounds,
        topology: args.topology.clone(),
        voting_method: args
            .voting
            .as_deref()
            .map(|v| parse_flag::<VotingMethod>("voting method", v))
            .transpose()?,
        evidence: args
            .evidence
            .as_deref()
            .map(|v| parse_flag::<EvidenceMode>("evidence mode", v))
            .transpose()?,
        adaptive: args
            .adaptive
            .as_deref()
            .map(|v| parse_flag::<AdaptivePreset>("adaptive preset", v))
            .transpose()?,
        red_team: args.red_team.clone(),
        reputation_weighting: args.reputation.then_some(true),
        exclude: args.exclude.clone(),
        ..Default::default()
    })
}

pub async fn run(env: &Environment, args: AskArgs) -> Result<ExitCode> {
    let profile = env.profile(args.profile.as_deref())?;
    let options = EngineOptions {
        memory_retrieval: !args.no_memory,
        policy_scope: args.policy.clone(),
        ..Default::default()
    };
    let engine = env.engine(&env.config.providers, profile, &overrides(&args)?, options)?;
    engine
        .events()
        .subscribe(Arc::new(ConsoleSink::new(args.verbose)));

    let result = engine.deliberate(&args.question).await?;

    println!("\n{}", "Synthesis".bold().underline());
    println!("{}\n", result.synthesis.content);
    if let Some(minority) = &result.synthesis.minority_report {
        println!("{}", "Minority report".bold().underline());
        println!("{minority}\n");
    }
    println!("{}", output::vote_table(&result.votes));
    println!(
        "synthesizer {} | consensus {:.2} | confidence {:.2} | session {}",
        result.synthesis.synthesizer.bold(),
        result.synthesis.consensus_score,
        result.synthesis.confidence_score,
        result.session_id.dimmed(),
    );
    Ok(ExitCode::SUCCESS)
}
