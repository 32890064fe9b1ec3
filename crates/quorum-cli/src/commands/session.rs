// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum session` - inspect recorded sessions.

use crate::helpers::Environment;
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use quorum::session::IndexRow;
use std::process::ExitCode;

#[derive(Args)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// List sessions from the global index
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Show only the most recent N sessions
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
    /// Show one session's phases and synthesis
    Show { id: String },
}

fn read_index(env: &Environment) -> Result<Vec<IndexRow>> {
    let path = env.paths.session_index();
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

pub fn run(env: &Environment, args: SessionArgs) -> Result<ExitCode> {
    match args.command {
        SessionCommand::List { format, limit } => {
            let mut rows = read_index(env)?;
            rows.reverse();
            rows.truncate(limit);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Text => {
                    let mut table =
                        output::table(&["session", "when", "question", "winner", "ms"]);
                    for row in rows {
                        let question: String = row.question.chars().take(48).collect();
                        table.add_row(vec![
                            row.session_id.chars().take(8).collect(),
                            row.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                            question,
                            row.winner,
                            row.duration_ms.to_string(),
                        ]);
                    }
                    println!("{table}");
                }
            }
        }
        SessionCommand::Show { id } => {
            let store = env.session(&id)?;
            let meta = store.read_meta()?;
            println!("session   {}", meta.session_id);
            println!("started   {}", meta.started_at);
            println!("profile   {} | topology {}", meta.profile, meta.topology);
            println!("providers {}", meta.providers.join(", "));
            println!("question  {}", meta.input);
            println!();
            for key in store.phase_keys()? {
                let phase = store.read_phase(&key)?;
                let fallbacks = phase.responses.iter().filter(|r| r.fallback).count();
                println!(
                    "  {key}: {} responses, {}ms{}",
                    phase.responses.len(),
                    phase.duration_ms,
                    if fallbacks > 0 {
                        format!(", {fallbacks} fallback(s)")
                    } else {
                        String::new()
                    }
                );
            }
            if store.has("synthesis") {
                let record: serde_json::Value = store.read_json("synthesis")?;
                if let Some(content) = record.get("content").and_then(|v| v.as_str()) {
                    println!("\n{content}");
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
