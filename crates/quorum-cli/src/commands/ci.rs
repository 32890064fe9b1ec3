// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum ci` - deliberation as a gate: exit 1 below thresholds.

use crate::helpers::Environment;
use crate::output::{self, ConsoleSink};
use anyhow::Result;
use clap::Args;
use quorum::engine::EngineOptions;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Args)]
pub struct CiArgs {
    #[command(flatten)]
    pub ask: super::ask::AskArgs,

    /// Fail (exit 1) when confidence is below this
    #[arg(long, default_value_t = 0.6)]
    pub min_confidence: f64,

    /// Fail (exit 1) when consensus is below this
    #[arg(long, default_value_t = 0.5)]
    pub min_consensus: f64,
}

pub async fn run(env: &Environment, args: CiArgs) -> Result<ExitCode> {
    let profile = env.profile(args.ask.profile.as_deref())?;
    let options = EngineOptions {
        memory_retrieval: !args.ask.no_memory,
        policy_scope: args.ask.policy.clone(),
        ..Default::default()
    };
    let overrides = super::ask::overrides(&args.ask)?;
    let engine = env.engine(&env.config.providers, profile, &overrides, options)?;
    engine
        .events()
        .subscribe(Arc::new(ConsoleSink::new(args.ask.verbose)));

    let result = engine.deliberate(&args.ask.question).await?;
    println!("{}", result.synthesis.content);
    println!(
        "consensus {:.2} (min {:.2}) | confidence {:.2} (min {:.2})",
        result.synthesis.consensus_score,
        args.min_consensus,
        result.synthesis.confidence_score,
        args.min_confidence,
    );

    let mut failed = false;
    if result.synthesis.confidence_score < args.min_confidence {
        output::print_error("confidence below threshold");
        failed = true;
    }
    if result.synthesis.consensus_score < args.min_consensus {
        output::print_error("consensus below threshold");
        failed = true;
    }
    Ok(if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
