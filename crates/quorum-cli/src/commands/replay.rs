// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum replay` - re-run a recorded deliberation and diff the outcome.

use crate::helpers::Environment;
use crate::output::ConsoleSink;
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use quorum::engine::EngineOptions;
use quorum::ledger::{diff_synthesis, Ledger};
use quorum::profile::ProfileOverrides;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Args)]
pub struct ReplayArgs {
    /// Ledger entry to replay (most recent when omitted)
    pub id: Option<String>,

    /// Override the recorded topology
    #[arg(long)]
    pub topology: Option<String>,

    /// Show per-provider progress
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

pub async fn run(env: &Environment, args: ReplayArgs) -> Result<ExitCode> {
    let ledger = Ledger::new(env.paths.ledger_path());
    let entry = ledger.get(args.id.as_deref())?;

    // Reconstruct the roster from the current configuration.
    let mut providers = Vec::new();
    for name in &entry.providers {
        match env.config.provider(name) {
            Some(config) => providers.push(config.clone()),
            None => bail!(
                "provider '{name}' from entry {} is no longer configured",
                entry.id
            ),
        }
    }

    // The recorded profile when it still exists, else the defaults.
    let profile = env
        .profile(Some(&entry.profile))
        .unwrap_or_default();
    let overrides = ProfileOverrides {
        topology: args.topology.clone().or_else(|| Some(entry.topology.clone())),
        ..Default::default()
    };
    let engine = env.engine(&providers, profile, &overrides, EngineOptions::default())?;
    engine
        .events()
        .subscribe(Arc::new(ConsoleSink::new(args.verbose)));

    println!("replaying {}: {}", entry.id.dimmed(), entry.input);
    let result = engine.deliberate(&entry.input).await?;

    println!("\n{}", "Synthesis diff (recorded vs replayed)".bold());
    print!(
        "{}",
        diff_synthesis(&entry.synthesis.content, &result.synthesis.content)
    );
    println!(
        "\nrecorded winner {} -> replayed winner {}",
        entry.votes.winner, result.votes.winner
    );
    Ok(ExitCode::SUCCESS)
}
