// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)
// Allow clippy warnings for CLI application
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod helpers;
mod output;

use commands::{arena, ask, attest, ci, ledger, memory, replay, session};

/// Quorum CLI - multi-model deliberation with a tamper-evident record
///
/// Ask a question to a roster of configured model providers, let them
/// deliberate, and get a synthesized answer plus ranked votes. Inspect,
/// verify, and replay past deliberations from the ledger.
#[derive(Parser)]
#[command(name = "quorum")]
#[command(author = "Andrew Yates")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-model deliberation engine", long_about = None)]
struct Cli {
    /// Base directory for sessions, ledger, memory, and policies
    /// (default: ~/.quorum)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Configuration file (default: <base-dir>/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a deliberation and print the synthesis
    Ask(ask::AskArgs),

    /// Run a deliberation with thresholds for CI gates (exit 1 on failure)
    Ci(ci::CiArgs),

    /// List or inspect recorded sessions
    Session(session::SessionArgs),

    /// List, show, verify, or export ledger entries
    Ledger(ledger::LedgerArgs),

    /// Build, verify, or diff per-session attestation chains
    Attest(attest::AttestArgs),

    /// Search or list the deliberation memory graph
    Memory(memory::MemoryArgs),

    /// Show provider reputation statistics
    Arena(arena::ArenaArgs),

    /// Re-run a ledger entry's deliberation and diff the syntheses
    Replay(replay::ReplayArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let env = helpers::Environment::resolve(cli.base_dir, cli.config)?;
    match cli.command {
        Commands::Ask(args) => ask::run(&env, args).await,
        Commands::Ci(args) => ci::run(&env, args).await,
        Commands::Session(args) => session::run(&env, args),
        Commands::Ledger(args) => ledger::run(&env, args),
        Commands::Attest(args) => attest::run(&env, args),
        Commands::Memory(args) => memory::run(&env, args),
        Commands::Arena(args) => arena::run(&env, args),
        Commands::Replay(args) => replay::run(&env, args).await,
    }
}
