// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Console output helpers shared by all commands.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use quorum::event::{Event, EventSink};
use quorum::voting::VoteResult;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Text,
    /// Machine-readable JSON output
    Json,
}

pub fn print_error(message: &str) {
    eprintln!("{} {message}", "error:".red().bold());
}

pub fn print_warning(message: &str) {
    eprintln!("{} {message}", "warning:".yellow());
}

/// Build a table with the house preset.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(headers.to_vec());
    table
}

/// Render a vote result as a compact standings table.
pub fn vote_table(votes: &VoteResult) -> Table {
    let mut t = table(&["rank", "provider", "score"]);
    for (i, ranked) in votes.rankings.iter().enumerate() {
        t.add_row(vec![
            (i + 1).to_string(),
            ranked.provider.clone(),
            format!("{:.2}", ranked.score),
        ]);
    }
    t
}

/// Live progress sink used by `ask` and `ci`.
pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::Phase { name, index, total } => {
                eprintln!(
                    "{} {} ({}/{})",
                    "phase".cyan().bold(),
                    name,
                    index + 1,
                    total
                );
            }
            Event::PhaseDone { name, duration_ms } => {
                eprintln!("{} {name} in {duration_ms}ms", "done ".green());
            }
            Event::Response {
                provider,
                chars,
                fallback,
                ..
            } => {
                if *fallback {
                    eprintln!("  {} {provider} fell back", "!".yellow());
                } else if self.verbose {
                    eprintln!("  {} {provider} responded ({chars} chars)", "·".dimmed());
                }
            }
            Event::Warn { message } => print_warning(message),
            Event::Adaptive { action, reason, .. } => {
                eprintln!("{} {action}: {reason}", "adapt".magenta());
            }
            Event::Policy {
                policy,
                action,
                message,
                ..
            } => {
                eprintln!("{} [{policy}/{action}] {message}", "policy".blue());
            }
            Event::Checkpoint { point, action } => {
                eprintln!("{} {point} -> {action}", "human".bold());
            }
            Event::Votes { result } => {
                eprintln!(
                    "{} winner {} ({}{})",
                    "votes".cyan().bold(),
                    result.winner.bold(),
                    result.method,
                    if result.controversial {
                        ", controversial"
                    } else {
                        ""
                    }
                );
            }
            Event::Complete {
                winner,
                duration_ms,
                ..
            } => {
                eprintln!(
                    "{} winner {winner} in {:.1}s",
                    "complete".green().bold(),
                    *duration_ms as f64 / 1000.0
                );
            }
            Event::Tool { command, success, .. } => {
                if self.verbose {
                    eprintln!(
                        "  {} hook `{command}` {}",
                        "tool".dimmed(),
                        if *success { "ok" } else { "failed" }
                    );
                }
            }
            Event::Evidence {
                phase,
                mean_score,
                claims,
            } => {
                if self.verbose {
                    eprintln!(
                        "  {} {phase}: {claims} claims, weighted {mean_score:.2}",
                        "evidence".dimmed()
                    );
                }
            }
        }
    }
}
