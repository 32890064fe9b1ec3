// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Quorum
//!
//! A multi-model deliberation engine: pose one question to a roster of
//! language-model providers, run a multi-phase reasoning protocol among
//! them, tally their ranked votes, and synthesize a final answer together
//! with a tamper-evident record of the whole process.
//!
//! ## Features
//!
//! - **Phase pipeline**: the canonical GATHER → PLAN → FORMULATE → DEBATE →
//!   ADJUST → REBUTTAL → VOTE → SYNTHESIZE protocol, with parallel fan-out,
//!   per-provider budgets, retries, and deterministic fallbacks
//! - **Debate topologies**: mesh, star, tournament, map-reduce, adversarial
//!   tree, pipeline, and panel, all consumed by one generic executor
//! - **Ranked voting**: Borda (weighted, self-vote discounted),
//!   instant-runoff, approval, and Condorcet with annotated Borda fallback
//! - **Attestation**: canonical-JSON hash chains over every phase's inputs
//!   and outputs, with verify and chain-diff
//! - **Ledger**: cross-session append-only log with integrity checking,
//!   ADR export, and replay
//! - **Policy engine**: declarative YAML rules gating entry and exit
//! - **Adaptive control**: entropy-driven skip/extend decisions between
//!   phases
//! - **Memory graph**: keyword retrieval of prior deliberations plus
//!   contradiction warnings
//!
//! ## Example
//!
//! ```no_run
//! use quorum::config::Paths;
//! use quorum::engine::DeliberationEngine;
//! use quorum::profile::AgentProfile;
//! use quorum::providers::AdapterRegistry;
//! use quorum::config::{AuthSpec, EnvCredentialResolver, ProviderConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> quorum::Result<()> {
//! let configs = vec![
//!     ProviderConfig {
//!         name: "gpt".into(), kind: "openai".into(), model: "gpt-4o".into(),
//!         auth: AuthSpec::Env { var: "OPENAI_API_KEY".into() },
//!         base_url: None, timeout_secs: None, context_window: None, weight: None,
//!     },
//!     ProviderConfig {
//!         name: "local".into(), kind: "mock".into(), model: "echo".into(),
//!         auth: AuthSpec::None,
//!         base_url: None, timeout_secs: None, context_window: None, weight: None,
//!     },
//! ];
//! let registry = AdapterRegistry::default();
//! let adapters = registry.build_all(&configs, &EnvCredentialResolver)?;
//! let engine = DeliberationEngine::new(
//!     adapters,
//!     AgentProfile::default(),
//!     Paths::new("/tmp/quorum"),
//! )?;
//! let result = engine.deliberate("Should we adopt Rust for the backend?").await?;
//! println!("{} says: {}", result.synthesis.synthesizer, result.synthesis.content);
//! # Ok(())
//! # }
//! ```

pub mod adaptive;
pub mod arena;
pub mod attest;
pub mod canonical;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod evidence;
pub mod hashchain;
pub mod hitl;
pub mod hooks;
pub mod ledger;
pub mod memory;
pub mod phases;
pub mod policy;
pub mod profile;
pub mod providers;
pub mod redteam;
pub mod session;
pub mod synthesis;
pub mod topology;
pub mod voting;

pub use engine::{DeliberationEngine, DeliberationResult, EngineOptions};
pub use error::{QuorumError, Result};
pub use event::{Event, EventBus, EventSink};
pub use profile::AgentProfile;
