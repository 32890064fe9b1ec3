// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum memory` - the deliberation memory graph.

use crate::helpers::Environment;
use crate::output;
use anyhow::Result;
use clap::{Args, Subcommand};
use quorum::memory::MemoryGraph;
use std::process::ExitCode;

#[derive(Args)]
pub struct MemoryArgs {
    #[command(subcommand)]
    pub command: MemoryCommand,
}

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// List all remembered deliberations
    List,
    /// Find prior deliberations similar to a query
    Search {
        query: String,
        #[arg(long, short = 'k', default_value_t = 5)]
        top: usize,
        #[arg(long, default_value_t = 0.2)]
        threshold: f64,
    },
}

pub fn run(env: &Environment, args: MemoryArgs) -> Result<ExitCode> {
    let memory = MemoryGraph::new(env.paths.memory_path());
    match args.command {
        MemoryCommand::List => {
            let mut table = output::table(&["session", "when", "question", "winner", "consensus"]);
            for node in memory.nodes()? {
                table.add_row(vec![
                    node.session_id.chars().take(8).collect(),
                    node.timestamp.format("%Y-%m-%d").to_string(),
                    node.input.chars().take(48).collect(),
                    node.winner.unwrap_or_else(|| "-".into()),
                    node.consensus_score
                        .map_or("-".into(), |s| format!("{s:.2}")),
                ]);
            }
            println!("{table}");
        }
        MemoryCommand::Search {
            query,
            top,
            threshold,
        } => {
            let hits = memory.find_similar(&query, top, threshold)?;
            if hits.is_empty() {
                println!("no similar deliberations");
            } else {
                for hit in hits {
                    println!(
                        "{:.2}  {}  {}",
                        hit.score,
                        hit.node.session_id.chars().take(8).collect::<String>(),
                        hit.node.input
                    );
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
