// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum attest` - per-session attestation chains.

use crate::helpers::Environment;
use crate::output;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use quorum::attest;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Args)]
pub struct AttestArgs {
    #[command(subcommand)]
    pub command: AttestCommand,
}

#[derive(Subcommand)]
pub enum AttestCommand {
    /// Derive a session's chain and print (or save) it
    Build {
        session: String,
        /// Write the length-prefixed binary frame to this file
        #[arg(long)]
        out: Option<PathBuf>,
        /// Emit the binary frame instead of canonical JSON
        #[arg(long)]
        binary: bool,
    },
    /// Verify a saved chain (or a fresh one) against its session directory
    Verify {
        session: String,
        /// Previously exported chain to check; omitted means self-check
        #[arg(long)]
        chain: Option<PathBuf>,
    },
    /// Compare two sessions' chains phase-by-phase
    Diff { left: String, right: String },
}

fn load_chain(path: &PathBuf) -> Result<attest::AttestationChain> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if let Ok(chain) = attest::import_binary(&bytes) {
        return Ok(chain);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn run(env: &Environment, args: AttestArgs) -> Result<ExitCode> {
    match args.command {
        AttestCommand::Build {
            session,
            out,
            binary,
        } => {
            let store = env.session(&session)?;
            let chain = attest::build(&store)?;
            if binary {
                let frame = attest::export_binary(&chain)?;
                match out {
                    Some(path) => std::fs::write(&path, frame)?,
                    None => anyhow::bail!("--binary requires --out"),
                }
            } else {
                let json = attest::export_canonical(&chain)?;
                match out {
                    Some(path) => std::fs::write(&path, json)?,
                    None => println!("{json}"),
                }
            }
        }
        AttestCommand::Verify { session, chain } => {
            let store = env.session(&session)?;
            let chain = match chain {
                Some(path) => load_chain(&path)?,
                None => attest::build(&store)?,
            };
            let verification = attest::verify(&chain, &store)?;
            if verification.valid {
                println!(
                    "{} {} records verified",
                    "ok".green().bold(),
                    chain.records.len()
                );
            } else {
                output::print_error(&format!(
                    "chain broken at {}: {}",
                    verification.broken_at.as_deref().unwrap_or("?"),
                    verification.details.as_deref().unwrap_or("unknown"),
                ));
                return Ok(ExitCode::from(1));
            }
        }
        AttestCommand::Diff { left, right } => {
            let left_chain = attest::build(&env.session(&left)?)?;
            let right_chain = attest::build(&env.session(&right)?)?;
            let diff = attest::diff(&left_chain, &right_chain);
            print!("{}", attest::format_diff(&left_chain, &right_chain, &diff));
            if diff.diverged_at.is_some() {
                return Ok(ExitCode::from(1));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
