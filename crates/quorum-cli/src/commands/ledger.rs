// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum ledger` - the cross-session record.

use crate::helpers::Environment;
use crate::output;
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use quorum::ledger::{export_adr, Ledger};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Args)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerCommand,
}

#[derive(Subcommand)]
pub enum LedgerCommand {
    /// List all entries
    List,
    /// Show one entry (most recent when no id given)
    Show { id: Option<String> },
    /// Recompute every hash and check the chain links
    Verify,
    /// Render an entry as an architecture decision record
    Export {
        id: Option<String>,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

pub fn run(env: &Environment, args: LedgerArgs) -> Result<ExitCode> {
    let ledger = Ledger::new(env.paths.ledger_path());
    match args.command {
        LedgerCommand::List => {
            let mut table = output::table(&["entry", "when", "question", "winner", "consensus"]);
            for entry in ledger.entries()? {
                let question: String = entry.input.chars().take(48).collect();
                table.add_row(vec![
                    entry.id.chars().take(8).collect(),
                    entry.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                    question,
                    entry.votes.winner.clone(),
                    format!("{:.2}", entry.synthesis.consensus_score),
                ]);
            }
            println!("{table}");
        }
        LedgerCommand::Show { id } => {
            let entry = ledger.get(id.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        LedgerCommand::Verify => {
            let verification = ledger.verify_integrity()?;
            if verification.valid {
                println!("{} {}", "ok".green().bold(), verification.message);
            } else {
                output::print_error(&verification.message);
                return Ok(ExitCode::from(1));
            }
        }
        LedgerCommand::Export { id, out } => {
            let entry = ledger.get(id.as_deref())?;
            let adr = export_adr(&entry);
            match out {
                Some(path) => std::fs::write(&path, adr)?,
                None => println!("{adr}"),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
