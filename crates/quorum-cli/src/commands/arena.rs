// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `quorum arena` - provider reputation standings.

use crate::helpers::Environment;
use crate::output;
use anyhow::Result;
use clap::Args;
use quorum::arena::Arena;
use std::process::ExitCode;

#[derive(Args)]
pub struct ArenaArgs {}

pub fn run(env: &Environment, _args: ArenaArgs) -> Result<ExitCode> {
    let arena = Arena::new(env.paths.arena_path());
    let stats = arena.stats()?;
    if stats.is_empty() {
        println!("no recorded deliberations yet");
        return Ok(ExitCode::SUCCESS);
    }
    let mut table = output::table(&["provider", "wins", "losses", "win rate", "avg score", "weight"]);
    for (provider, s) in &stats {
        let avg = if s.runs == 0 {
            0.0
        } else {
            s.total_score / s.runs as f64
        };
        table.add_row(vec![
            provider.clone(),
            s.wins.to_string(),
            s.losses.to_string(),
            format!("{:.2}", s.win_rate()),
            format!("{avg:.2}"),
            format!("{:.2}", arena.weight_for(provider)?),
        ]);
    }
    println!("{table}");
    Ok(ExitCode::SUCCESS)
}
