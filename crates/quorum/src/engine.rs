// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The deliberation engine.
//!
//! Owns the adapter roster and session store for the duration of one run
//! and drives the phase pipeline: policy pre-check, topology expansion,
//! per-phase parallel fan-out with retry and fallback, adaptive decisions,
//! human checkpoints, vote tallying, synthesis, and finalization into the
//! ledger, memory graph, and arena.
//!
//! Failure semantics: provider errors and timeouts are retried then
//! substituted with fallback text inside the phase; persistence failures
//! degrade to warning events (the returned value is authoritative); policy
//! blocks and human aborts terminate the run.

use crate::adaptive::{convergence, AdaptiveAction, AdaptiveController, AdaptiveDecision};
use crate::arena::Arena;
use crate::config::Paths;
use crate::context::{self, Segment};
use crate::error::{QuorumError, Result};
use crate::event::{Event, EventBus};
use crate::evidence::{self, CrossValidation, EvidenceConfig, ProviderEvidence};
use crate::hitl::{Checkpoint, CheckpointPoint, HitlAction, HitlHandler};
use crate::hooks::{HookContext, HookRunner};
use crate::ledger::{Ledger, LedgerEntry};
use crate::memory::{MemoryGraph, MemoryHit, MemoryNode};
use crate::phases::{names, PhaseInput, PhaseOutput, PhaseResponse, PromptCtx};
use crate::policy::{PolicyAction, PolicySet, PostContext, PreContext};
use crate::profile::{AgentProfile, EvidenceMode};
use crate::providers::{fallback_text, ProviderAdapter};
use crate::redteam::{AttackPack, RedTeamResult};
use crate::session::{IndexRow, SessionMeta, SessionStore};
use crate::synthesis::{self, Synthesis, SynthesisInputs, SynthesisRecord};
use crate::topology::{self, PhaseSpec, SynthesizerChoice, TopologyPlan};
use crate::voting::{
    self, parse_ballot, Ballot, ScoredCandidate, TallyOptions, VoteResult,
};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Retries per provider call after the first attempt.
    pub max_retries: u32,
    /// Fixed delay between retries.
    pub retry_delay: Duration,
    /// Query the memory graph and inject prior context into GATHER.
    pub memory_retrieval: bool,
    /// Retrieval depth and threshold.
    pub memory_top_k: usize,
    pub memory_threshold: f64,
    /// Evaluate only this policy, when set.
    pub policy_scope: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            memory_retrieval: true,
            memory_top_k: 3,
            memory_threshold: 0.25,
            policy_scope: None,
        }
    }
}

/// What `deliberate` returns; authoritative even when persistence failed.
#[derive(Debug, Clone)]
pub struct DeliberationResult {
    pub session_id: String,
    pub session_dir: PathBuf,
    pub synthesis: Synthesis,
    pub votes: VoteResult,
    pub duration_ms: u64,
}

/// Mutable state threaded through one run.
struct RunState {
    session_id: String,
    input: String,
    guidance: Vec<String>,
    store: Option<SessionStore>,
    /// Latest response per provider, across phases.
    latest: HashMap<String, String>,
    rebuttals: Vec<(String, String)>,
    memory_context: Option<String>,
    memory_hits: Vec<MemoryHit>,
    skip: HashSet<String>,
    skip_to_synthesize: bool,
    decisions: Vec<AdaptiveDecision>,
    evidences: BTreeMap<String, ProviderEvidence>,
    cross: Option<CrossValidation>,
    red_team: Option<RedTeamResult>,
    phase_file_index: HashMap<String, usize>,
    phases_written: usize,
    interventions: usize,
    hook_ctx: HookContext,
}

impl RunState {
    fn effective_input(&self) -> String {
        if self.guidance.is_empty() {
            return self.input.clone();
        }
        format!(
            "{}\n\nAdditional guidance from the operator:\n{}",
            self.input,
            self.guidance.join("\n")
        )
    }

    /// `NN-<phase>` file key; extra rounds reuse the phase's index.
    fn file_key(&mut self, phase: &str, round: u32) -> String {
        let next = self.phases_written;
        let index = *self
            .phase_file_index
            .entry(phase.to_string())
            .or_insert_with(|| {
                next
            });
        if index == self.phases_written {
            self.phases_written += 1;
        }
        crate::phases::file_key(index, phase, round)
    }
}

/// Orchestrates one deliberation at a time over an owned adapter roster.
pub struct DeliberationEngine {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    profile: AgentProfile,
    paths: Paths,
    policies: PolicySet,
    events: EventBus,
    hitl: Option<Arc<dyn HitlHandler>>,
    options: EngineOptions,
}

impl DeliberationEngine {
    /// Build an engine. Providers excluded by the profile are dropped here;
    /// fewer than two remaining is a fail-fast configuration error.
    pub fn new(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        profile: AgentProfile,
        paths: Paths,
    ) -> Result<Self> {
        profile.validate()?;
        let adapters: Vec<Arc<dyn ProviderAdapter>> = adapters
            .into_iter()
            .filter(|a| !profile.exclude_from_deliberation.contains(&a.name().to_string()))
            .collect();
        if adapters.len() < 2 {
            return Err(QuorumError::Config(format!(
                "deliberation needs at least 2 providers, {} remain after exclusions",
                adapters.len()
            )));
        }
        Ok(Self {
            adapters,
            profile,
            paths,
            policies: PolicySet::default(),
            events: EventBus::new(),
            hitl: None,
            options: EngineOptions::default(),
        })
    }

    #[must_use]
    pub fn with_policies(mut self, policies: PolicySet) -> Self {
        self.policies = policies;
        self
    }

    #[must_use]
    pub fn with_hitl(mut self, handler: Arc<dyn HitlHandler>) -> Self {
        self.hitl = Some(handler);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// The event bus; subscribe before calling `deliberate`.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Roster names in configuration order.
    #[must_use]
    pub fn roster(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    fn adapter(&self, name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    fn warn(&self, message: impl Into<String>) {
        self.events.emit(Event::Warn {
            message: message.into(),
        });
    }

    /// Best-effort persistence: failures become warnings, never errors.
    fn persist(&self, state: &RunState, what: &str, write: impl FnOnce(&SessionStore) -> Result<()>) {
        if let Some(store) = &state.store {
            if let Err(e) = write(store) {
                self.warn(format!("failed to persist {what}: {e}"));
            }
        }
    }

    /// Run the full deliberation over `input`.
    pub async fn deliberate(&self, input: &str) -> Result<DeliberationResult> {
        let started = Instant::now();
        let roster = self.roster();

        // Policy pre-check runs before any external call.
        let policies = match &self.options.policy_scope {
            Some(name) => self.policies.scoped(name)?,
            None => self.policies.clone(),
        };
        let pre_violations = policies.evaluate_pre(&PreContext {
            input,
            providers: &roster,
            red_team_enabled: self.profile.red_team.is_some(),
            hitl_available: self.hitl.is_some(),
        });
        for violation in &pre_violations {
            self.events.emit(Event::Policy {
                policy: violation.policy.clone(),
                rule: violation.rule.clone(),
                action: violation.action.to_string(),
                message: violation.message.clone(),
            });
        }
        if let Some(blocked) = pre_violations
            .iter()
            .find(|v| v.action == PolicyAction::Block)
        {
            return Err(QuorumError::PolicyBlocked {
                policy: blocked.policy.clone(),
                message: blocked.message.clone(),
            });
        }

        // Session init.
        let session_id = Uuid::new_v4().to_string();
        let session_dir = self.paths.sessions_dir().join(&session_id);
        let store = match SessionStore::init(&session_dir, self.paths.session_index()) {
            Ok(store) => Some(store),
            Err(e) => {
                self.warn(format!("session store unavailable: {e}"));
                None
            }
        };

        let topology_name = self
            .profile
            .topology
            .clone()
            .unwrap_or_else(|| "mesh".to_string());
        let mut state = RunState {
            session_id: session_id.clone(),
            input: input.to_string(),
            guidance: Vec::new(),
            store,
            latest: HashMap::new(),
            rebuttals: Vec::new(),
            memory_context: None,
            memory_hits: Vec::new(),
            skip: HashSet::new(),
            skip_to_synthesize: false,
            decisions: Vec::new(),
            evidences: BTreeMap::new(),
            cross: None,
            red_team: None,
            phase_file_index: HashMap::new(),
            phases_written: 0,
            interventions: 0,
            hook_ctx: HookContext {
                session_id: session_id.clone(),
                input: input.to_string(),
                providers: roster.clone(),
            },
        };

        self.persist(&state, "meta", |store| {
            store.write_meta(&SessionMeta {
                session_id: session_id.clone(),
                started_at: Utc::now(),
                input: input.to_string(),
                profile: self.profile.name.clone(),
                topology: topology_name.clone(),
                providers: roster.clone(),
            })
        });

        // Pause-level pre violations become checkpoints.
        for violation in pre_violations
            .iter()
            .filter(|v| v.action == PolicyAction::Pause)
        {
            self.checkpoint(
                &mut state,
                CheckpointPoint::PolicyPause {
                    policy: violation.policy.clone(),
                    rule: violation.rule.clone(),
                },
                violation.message.clone(),
                serde_json::Value::Null,
            )
            .await?;
        }

        // Memory retrieval feeds the GATHER system prompt.
        if self.options.memory_retrieval {
            let memory = MemoryGraph::new(self.paths.memory_path());
            match memory.find_similar(input, self.options.memory_top_k, self.options.memory_threshold)
            {
                Ok(hits) if !hits.is_empty() => {
                    state.memory_context = Some(MemoryGraph::summarize(&hits));
                    state.memory_hits = hits;
                }
                Ok(_) => {}
                Err(e) => self.warn(format!("memory retrieval failed: {e}")),
            }
        }

        // Topology expansion.
        let plan = topology::plan(&topology_name, &roster, &self.profile)?;
        self.persist(&state, "topology plan", |store| {
            store.write_json("topology-plan", &plan.to_record())
        });

        // Phase pipeline (everything before the vote).
        let mut controller = self
            .profile
            .adaptive
            .map(AdaptiveController::new);
        let total = plan.phases.len();
        for (index, spec) in plan.phases.iter().enumerate() {
            if spec.name == names::VOTE {
                continue; // handled below, after the optional red-team phase
            }
            if state.skip_to_synthesize {
                break;
            }
            if state.skip.contains(&spec.name) {
                self.warn(format!("phase {} skipped by adaptive decision", spec.name));
                continue;
            }
            if spec.name == names::REBUTTAL {
                let responses: Vec<String> = spec
                    .participants
                    .iter()
                    .filter_map(|p| state.latest.get(p).cloned())
                    .collect();
                let score = convergence(&responses);
                if score >= self.profile.convergence_threshold {
                    self.events.emit(Event::Adaptive {
                        phase: spec.name.clone(),
                        action: "skip-phases".into(),
                        entropy: score,
                        reason: format!(
                            "convergence {score:.2} >= threshold {:.2}; rebuttal adds nothing",
                            self.profile.convergence_threshold
                        ),
                    });
                    continue;
                }
            }

            let baseline_rounds = if spec.name == names::DEBATE {
                self.profile.rounds
            } else {
                1
            };
            let mut round = 1;
            loop {
                let output = self
                    .run_phase(&mut state, spec, round, index, total, None, None)
                    .await?;

                if spec.name == names::REBUTTAL {
                    state.rebuttals = output
                        .responses
                        .iter()
                        .map(|r| (r.provider.clone(), r.text.clone()))
                        .collect();
                }

                self.score_evidence(&mut state, spec, &output);
                self.after_phase_checkpoint(&mut state, &spec.name, &output).await?;

                let mut add_round = false;
                if let Some(controller) = controller.as_mut() {
                    let responses: Vec<String> =
                        output.responses.iter().map(|r| r.text.clone()).collect();
                    let remaining: Vec<String> = plan.phases[index + 1..]
                        .iter()
                        .map(|p| p.name.clone())
                        .collect();
                    let decision = controller.evaluate(&spec.name, &responses, &remaining);
                    self.events.emit(Event::Adaptive {
                        phase: decision.phase.clone(),
                        action: action_label(&decision.action).into(),
                        entropy: decision.entropy,
                        reason: decision.reason.clone(),
                    });
                    match &decision.action {
                        AdaptiveAction::Continue => {}
                        AdaptiveAction::SkipPhases { phases } => {
                            state.skip.extend(phases.iter().cloned());
                        }
                        AdaptiveAction::AddRound => add_round = true,
                        AdaptiveAction::SkipToSynthesize => state.skip_to_synthesize = true,
                    }
                    state.decisions.push(decision);
                }

                if round < baseline_rounds || add_round {
                    round += 1;
                    continue;
                }
                break;
            }
        }

        if !state.decisions.is_empty() {
            self.persist(&state, "adaptive decisions", |store| {
                store.write_json("adaptive-decisions", &state.decisions)
            });
        }

        // Optional red-team pass over the finalized positions.
        if let Some(pack_name) = self.profile.red_team.clone() {
            self.run_red_team(&mut state, &pack_name, &roster, total).await;
        }

        // Vote.
        let vote_spec = plan
            .phases
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == names::VOTE);
        let mut votes = match (plan.voting_enabled, vote_spec) {
            (true, Some((index, spec))) => {
                self.run_vote(&mut state, spec, index, total).await?
            }
            _ => self.placeholder_votes(&plan, &roster),
        };
        self.events.emit(Event::Votes {
            result: votes.clone(),
        });

        // Controversy checkpoint; the handler may override the winner.
        self.vote_checkpoints(&mut state, &mut votes).await?;

        // Synthesis.
        let synthesizer = self.pick_synthesizer(&plan, &votes);
        let synthesis = self
            .run_synthesis(&mut state, &synthesizer, &votes)
            .await;
        let record = SynthesisRecord {
            synthesis: synthesis.clone(),
            votes: votes.clone(),
        };
        self.persist(&state, "synthesis", |store| store.write_synthesis(&record));
        if let Some(cross) = &state.cross {
            self.persist(&state, "cross references", |store| {
                store.write_json("cross-references", cross)
            });
        }

        // Policy post-check.
        let duration_ms = started.elapsed().as_millis() as u64;
        let post_violations = policies.evaluate_post(&PostContext {
            input,
            consensus_score: synthesis.consensus_score,
            confidence_score: synthesis.confidence_score,
            duration_secs: duration_ms / 1000,
            evidence_enabled: self.profile.evidence != EvidenceMode::Off,
        });
        for violation in &post_violations {
            self.events.emit(Event::Policy {
                policy: violation.policy.clone(),
                rule: violation.rule.clone(),
                action: violation.action.to_string(),
                message: violation.message.clone(),
            });
        }
        if let Some(blocked) = post_violations
            .iter()
            .find(|v| v.action == PolicyAction::Block)
        {
            return Err(QuorumError::PolicyBlocked {
                policy: blocked.policy.clone(),
                message: blocked.message.clone(),
            });
        }

        // Finalize: index, arena, memory, ledger. All best-effort.
        self.finalize(&state, &synthesis, &votes, &topology_name, duration_ms);

        self.events.emit(Event::Complete {
            session_id: session_id.clone(),
            winner: votes.winner.clone(),
            duration_ms,
        });

        Ok(DeliberationResult {
            session_id,
            session_dir,
            synthesis,
            votes,
            duration_ms,
        })
    }

    /// One phase: build budgeted prompts, fan out with retries, persist.
    #[allow(clippy::too_many_arguments)]
    async fn run_phase(
        &self,
        state: &mut RunState,
        spec: &PhaseSpec,
        round: u32,
        index: usize,
        total: usize,
        visible_override: Option<Vec<(String, String)>>,
        extra: Option<String>,
    ) -> Result<PhaseOutput> {
        let phase_started = Instant::now();
        self.events.emit(Event::Phase {
            name: spec.name.clone(),
            index,
            total,
        });

        let hooks = HookRunner::new(self.profile.hooks.clone());
        if let Some((command, result)) = hooks.run_pre(&spec.name, &state.hook_ctx).await {
            self.events.emit(Event::Tool {
                phase: spec.name.clone(),
                command,
                success: result.is_ok(),
            });
            if let Err(e) = result {
                self.warn(format!("pre-{} hook failed: {e}", spec.name));
            }
        }

        // Build every participant's prompt up front, in roster order.
        let mut inputs = Vec::with_capacity(spec.participants.len());
        for participant in &spec.participants {
            let visible = match &visible_override {
                Some(shared) => shared.clone(),
                None => spec
                    .visibility
                    .get(participant)
                    .map(|sources| {
                        sources
                            .iter()
                            .filter_map(|s| {
                                state.latest.get(s).map(|text| (s.clone(), text.clone()))
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            let mut ctx = PromptCtx {
                input: state.effective_input(),
                phase: spec.name.clone(),
                round,
                participant: participant.clone(),
                focus: self.profile.focus.clone(),
                challenge_style: self.profile.challenge_style,
                visible,
                memory_context: if spec.name == names::GATHER {
                    state.memory_context.clone()
                } else {
                    None
                },
                extra: extra.clone(),
            };

            let adapter = self.adapter(participant).ok_or_else(|| {
                QuorumError::Config(format!("no adapter for participant '{participant}'"))
            })?;
            self.budget_ctx(&mut ctx, spec, adapter.config().context_window());

            let system = (spec.system_prompt)(&ctx);
            let prompt = (spec.user_prompt)(&ctx);
            inputs.push(PhaseInput {
                provider: participant.clone(),
                system: Some(system),
                prompt,
            });
        }

        // Fan out. Parallel phases dispatch every participant at once;
        // serial phases run them in order. Either way the collected map is
        // keyed in roster order, never completion order.
        let calls = inputs.iter().map(|input| {
            let adapter = self.adapter(&input.provider).cloned();
            let prior = state.latest.get(&input.provider).cloned();
            async move {
                match adapter {
                    Some(adapter) => {
                        self.call_with_retry(&adapter, &input.prompt, input.system.as_deref(), prior)
                            .await
                    }
                    None => (
                        fallback_text(&input.provider),
                        true,
                        vec![format!("no adapter for '{}'", input.provider)],
                    ),
                }
            }
        });
        let results: Vec<(String, bool, Vec<String>)> = if spec.parallel {
            join_all(calls).await
        } else {
            let mut results = Vec::with_capacity(spec.participants.len());
            for call in calls {
                results.push(call.await);
            }
            results
        };

        let mut responses = Vec::with_capacity(results.len());
        for (input, (text, fallback, warnings)) in inputs.iter().zip(results) {
            for warning in warnings {
                self.warn(warning);
            }
            self.events.emit(Event::Response {
                phase: spec.name.clone(),
                provider: input.provider.clone(),
                chars: text.len(),
                fallback,
            });
            responses.push(PhaseResponse {
                provider: input.provider.clone(),
                text,
                fallback,
            });
        }

        let output = PhaseOutput {
            phase: spec.name.clone(),
            timestamp: Utc::now(),
            duration_ms: phase_started.elapsed().as_millis() as u64,
            inputs,
            responses,
        };

        let key = state.file_key(&spec.name, round);
        self.persist(state, &format!("phase {key}"), |store| {
            store.write_phase(&key, &output)
        });

        if let Some((command, result)) = hooks.run_post(&spec.name, &state.hook_ctx, &output).await
        {
            self.events.emit(Event::Tool {
                phase: spec.name.clone(),
                command,
                success: result.is_ok(),
            });
            if let Err(e) = result {
                self.warn(format!("post-{} hook failed: {e}", spec.name));
            }
        }

        for response in &output.responses {
            state
                .latest
                .insert(response.provider.clone(), response.text.clone());
        }
        self.events.emit(Event::PhaseDone {
            name: spec.name.clone(),
            duration_ms: output.duration_ms,
        });
        Ok(output)
    }

    /// Trim the visible block to the provider's budget, keeping the
    /// instruction segment intact.
    fn budget_ctx(&self, ctx: &mut PromptCtx, spec: &PhaseSpec, context_window: usize) {
        let budget = context::provider_budget(context_window);
        let instruction_ctx = PromptCtx {
            visible: Vec::new(),
            ..ctx.clone()
        };
        let instruction = (spec.user_prompt)(&instruction_ctx);
        let mut segments = vec![Segment::full("instruction", instruction)];
        for (label, text) in &ctx.visible {
            segments.push(Segment::trimmable(label.clone(), text.clone()));
        }
        let fitted = context::fit_each(&segments, budget);
        if let Some(warning) = &fitted.warning {
            self.warn(format!("{}: {warning}", ctx.participant));
            return;
        }
        if fitted.trimmed.is_empty() {
            return;
        }
        self.warn(format!(
            "{}: trimmed context segments [{}] to fit {} tokens",
            ctx.participant,
            fitted.trimmed.join(", "),
            budget
        ));
        ctx.visible = fitted
            .segments
            .into_iter()
            .skip(1)
            .map(|s| (s.name, s.text))
            .collect();
    }

    /// One provider call with deadline, retries, and fallback substitution.
    async fn call_with_retry(
        &self,
        adapter: &Arc<dyn ProviderAdapter>,
        prompt: &str,
        system: Option<&str>,
        prior: Option<String>,
    ) -> (String, bool, Vec<String>) {
        let name = adapter.name().to_string();
        let deadline = Duration::from_secs(adapter.config().timeout_secs());
        let attempts = self.options.max_retries + 1;
        let mut warnings = Vec::new();

        for attempt in 1..=attempts {
            let outcome = match tokio::time::timeout(deadline, adapter.generate(prompt, system)).await
            {
                Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
                Ok(Ok(_)) => Err(QuorumError::provider(&name, "empty response")),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(QuorumError::Timeout {
                    provider: name.clone(),
                    seconds: deadline.as_secs(),
                }),
            };
            match outcome {
                Ok(text) => return (text, false, warnings),
                Err(e) => {
                    warnings.push(format!("{name} attempt {attempt}/{attempts} failed: {e}"));
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }

        let text = prior.unwrap_or_else(|| fallback_text(&name));
        warnings.push(format!(
            "{name} exhausted {attempts} attempts; substituting fallback"
        ));
        (text, true, warnings)
    }

    /// Evidence scoring over position-bearing phases.
    fn score_evidence(&self, state: &mut RunState, spec: &PhaseSpec, output: &PhaseOutput) {
        if self.profile.evidence == EvidenceMode::Off {
            return;
        }
        if spec.name != names::FORMULATE && spec.name != names::ADJUST {
            return;
        }
        for response in &output.responses {
            let scored = evidence::score_response(&response.provider, &response.text);
            state.evidences.insert(response.provider.clone(), scored);
        }
        let all: Vec<ProviderEvidence> = state.evidences.values().cloned().collect();
        let config = EvidenceConfig {
            similarity_threshold: self.profile.similarity_threshold,
        };
        let cross = evidence::cross_validate(&all, &config);
        let claims: usize = all.iter().map(|e| e.claims.len()).sum();
        let mean = if all.is_empty() {
            0.0
        } else {
            all.iter().map(|e| e.weighted_score).sum::<f64>() / all.len() as f64
        };
        self.events.emit(Event::Evidence {
            phase: spec.name.clone(),
            mean_score: mean,
            claims,
        });
        self.persist(state, "evidence report", |store| {
            store.write_json("evidence-report", &all)
        });
        state.cross = Some(cross);
    }

    async fn after_phase_checkpoint(
        &self,
        state: &mut RunState,
        phase: &str,
        output: &PhaseOutput,
    ) -> Result<()> {
        if !self
            .profile
            .checkpoints
            .after_phases
            .iter()
            .any(|p| p == phase)
        {
            return Ok(());
        }
        let snapshot = serde_json::to_value(output).unwrap_or(serde_json::Value::Null);
        self.checkpoint(
            state,
            CheckpointPoint::AfterPhase {
                phase: phase.to_string(),
            },
            format!("phase {phase} completed with {} responses", output.responses.len()),
            snapshot,
        )
        .await
        .map(|_| ())
    }

    /// Offer a checkpoint; apply inject/abort uniformly and hand any other
    /// action back to the caller.
    async fn checkpoint(
        &self,
        state: &mut RunState,
        point: CheckpointPoint,
        summary: String,
        snapshot: serde_json::Value,
    ) -> Result<HitlAction> {
        let Some(handler) = &self.hitl else {
            return Ok(HitlAction::Continue);
        };
        let checkpoint = Checkpoint {
            point: point.clone(),
            session_id: state.session_id.clone(),
            summary,
            state: snapshot,
        };
        let action = handler.on_checkpoint(&checkpoint).await;
        self.events.emit(Event::Checkpoint {
            point: point.label(),
            action: action.label().to_string(),
        });
        let intervention = state.interventions;
        state.interventions += 1;
        self.persist(state, "intervention", |store| {
            store.write_json(
                &format!("intervention-{intervention}"),
                &serde_json::json!({ "point": &point, "action": action.label() }),
            )
        });
        match &action {
            HitlAction::Abort => Err(QuorumError::Aborted(format!(
                "human abort at {}",
                point.label()
            ))),
            HitlAction::Inject { input } => {
                state.guidance.push(input.clone());
                Ok(action)
            }
            _ => Ok(action),
        }
    }

    /// Red-team pass: every participant attacks the finalized positions.
    async fn run_red_team(
        &self,
        state: &mut RunState,
        pack_name: &str,
        roster: &[String],
        total: usize,
    ) {
        let pack = match AttackPack::resolve(pack_name, &self.paths.attacks_dir()) {
            Ok(pack) => pack,
            Err(e) => {
                self.warn(format!("red team disabled: {e}"));
                return;
            }
        };
        let positions: Vec<(String, String)> = roster
            .iter()
            .filter_map(|p| state.latest.get(p).map(|t| (p.clone(), t.clone())))
            .collect();
        let spec = PhaseSpec {
            name: names::RED_TEAM.to_string(),
            parallel: true,
            participants: roster.to_vec(),
            visibility: HashMap::new(),
            system_prompt: Arc::new(crate::phases::default_system),
            user_prompt: Arc::new(crate::phases::default_user),
        };
        match self
            .run_phase(
                state,
                &spec,
                1,
                total,
                total,
                Some(positions),
                Some(pack.prompt_block()),
            )
            .await
        {
            Ok(output) => {
                let result = RedTeamResult {
                    pack: pack.name.clone(),
                    findings: output
                        .responses
                        .iter()
                        .map(|r| (r.provider.clone(), r.text.clone()))
                        .collect(),
                };
                self.persist(state, "red team result", |store| {
                    store.write_json("redteam-result", &result)
                });
                state.red_team = Some(result);
            }
            Err(e) => self.warn(format!("red team phase failed: {e}")),
        }
    }

    /// Vote phase: anonymized positions, staged ballot parsing, weighted tally.
    async fn run_vote(
        &self,
        state: &mut RunState,
        spec: &PhaseSpec,
        index: usize,
        total: usize,
    ) -> Result<VoteResult> {
        let candidates = spec.participants.clone();
        let positions: Vec<(String, String)> = candidates
            .iter()
            .enumerate()
            .map(|(i, provider)| {
                let text = state
                    .latest
                    .get(provider)
                    .cloned()
                    .unwrap_or_else(|| fallback_text(provider));
                (format!("Position {}", voting::position_letter(i)), text)
            })
            .collect();
        let instructions = format!(
            "Respond with a JSON object of the form\n\
             {{\"rankings\": [{{\"position\": \"A\", \"rank\": 1, \"reason\": \"...\"}}]}}\n\
             ranking all {} positions. Rank every position exactly once.",
            candidates.len()
        );

        let output = self
            .run_phase(
                state,
                spec,
                1,
                index,
                total,
                Some(positions),
                Some(instructions),
            )
            .await?;

        let mut ballots: Vec<Ballot> = Vec::new();
        for response in &output.responses {
            if response.fallback {
                self.warn(format!("{}: no ballot (fallback response)", response.provider));
                continue;
            }
            match parse_ballot(&response.provider, &response.text, &candidates) {
                Some(parsed) => ballots.push(parsed.ballot),
                None => self.warn(format!(
                    "{}: ballot unparseable, not counted",
                    response.provider
                )),
            }
        }

        if ballots.is_empty() {
            self.warn("no parseable ballots; vote degenerates to roster order");
            return Ok(degenerate_votes(
                &candidates,
                &candidates[0],
                self.profile.voting_method,
                "no parseable ballots",
            ));
        }

        let options = self.tally_options(&candidates, state);
        voting::tally(self.profile.voting_method, &ballots, &candidates, &options)
    }

    /// Combined candidate weights: provider config × profile × reputation ×
    /// evidence (strict mode only).
    fn tally_options(&self, candidates: &[String], state: &RunState) -> TallyOptions {
        let arena = Arena::new(self.paths.arena_path());
        let mut options = TallyOptions::default();
        for candidate in candidates {
            let mut weight = self
                .adapter(candidate)
                .and_then(|a| a.config().weight)
                .unwrap_or(1.0);
            if let Some(profile_weight) = self.profile.weights.get(candidate) {
                weight *= profile_weight;
            }
            if self.profile.reputation_weighting {
                match arena.weight_for(candidate) {
                    Ok(factor) => weight *= factor,
                    Err(e) => self.warn(format!("reputation weight unavailable: {e}")),
                }
            }
            if self.profile.evidence == EvidenceMode::Strict {
                if let Some(evidence) = state.evidences.get(candidate) {
                    weight *= evidence::strict_vote_factor(evidence.weighted_score);
                }
            }
            options.weights.insert(candidate.clone(), weight);
        }
        options
    }

    /// Votes for plans that do not vote: roster order, synthesizer wins.
    fn placeholder_votes(&self, plan: &TopologyPlan, roster: &[String]) -> VoteResult {
        let winner = match &plan.synthesizer {
            SynthesizerChoice::Provider(name) => name.clone(),
            SynthesizerChoice::Auto => roster[0].clone(),
        };
        degenerate_votes(
            roster,
            &winner,
            self.profile.voting_method,
            "voting disabled by topology",
        )
    }

    async fn vote_checkpoints(&self, state: &mut RunState, votes: &mut VoteResult) -> Result<()> {
        let margin = match (votes.rankings.first(), votes.rankings.get(1)) {
            (Some(first), Some(second)) => {
                (first.score - second.score).abs() / first.score.max(1.0)
            }
            _ => 1.0,
        };
        let config = &self.profile.checkpoints;
        let mut points = Vec::new();
        if config.after_vote {
            points.push(CheckpointPoint::AfterVote);
        }
        if config.on_controversy && margin < config.controversy_threshold {
            points.push(CheckpointPoint::OnControversy { margin });
        }
        for point in points {
            let snapshot = serde_json::to_value(&*votes).unwrap_or(serde_json::Value::Null);
            let action = self
                .checkpoint(
                    state,
                    point,
                    format!("winner {} (margin {margin:.2})", votes.winner),
                    snapshot,
                )
                .await?;
            if let HitlAction::OverrideWinner { winner } = action {
                if votes.rankings.iter().any(|r| r.provider == winner) {
                    override_winner(votes, &winner);
                } else {
                    self.warn(format!("override ignored: '{winner}' is not a candidate"));
                }
            }
        }
        Ok(())
    }

    /// Prefer the runner-up to reduce confirmation bias; fall back to the
    /// first adapter.
    fn pick_synthesizer(&self, plan: &TopologyPlan, votes: &VoteResult) -> String {
        if let SynthesizerChoice::Provider(name) = &plan.synthesizer {
            if self.adapter(name).is_some() {
                return name.clone();
            }
        }
        votes
            .runner_up()
            .filter(|name| self.adapter(name).is_some())
            .map(str::to_string)
            .unwrap_or_else(|| self.adapters[0].name().to_string())
    }

    async fn run_synthesis(
        &self,
        state: &mut RunState,
        synthesizer: &str,
        votes: &VoteResult,
    ) -> Synthesis {
        let roster = self.roster();
        let positions: Vec<(String, String)> = roster
            .iter()
            .filter_map(|p| state.latest.get(p).map(|t| (p.clone(), t.clone())))
            .collect();
        let vote_summary = votes
            .rankings
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {} (score {:.2})", i + 1, r.provider, r.score))
            .collect::<Vec<_>>()
            .join("\n");
        let evidence_summary = state.cross.as_ref().map(|cross| {
            format!(
                "{} corroborated claim group(s), {} contradicted",
                cross.corroborated, cross.contradicted
            )
        });
        let red_team_summary = state.red_team.as_ref().map(|result| {
            result
                .findings
                .iter()
                .map(|(provider, findings)| {
                    let head: String = findings.chars().take(400).collect();
                    format!("--- {provider} ---\n{head}")
                })
                .collect::<Vec<_>>()
                .join("\n")
        });

        let inputs = SynthesisInputs {
            input: state.effective_input(),
            positions: positions.clone(),
            rebuttals: state.rebuttals.clone(),
            vote_summary,
            evidence_summary,
            red_team_summary,
        };
        let prompt = synthesis::build_prompt(&inputs);

        let system = format!(
            "You are {synthesizer}, selected to synthesize a multi-model deliberation. \
             Be faithful to the strongest arguments, preserve genuine dissent, and \
             report honest consensus and confidence scores."
        );
        let raw = match self.adapter(synthesizer) {
            Some(adapter) => {
                let (text, fallback, warnings) = self
                    .call_with_retry(adapter, &prompt, Some(&system), None)
                    .await;
                for warning in warnings {
                    self.warn(warning);
                }
                if fallback {
                    self.warn("synthesizer fell back; synthesis is a stub".to_string());
                }
                text
            }
            None => fallback_text(synthesizer),
        };

        let mut contributions = BTreeMap::new();
        for (provider, position) in &positions {
            contributions.insert(
                provider.clone(),
                synthesis::contribution_points(position, 3),
            );
        }
        synthesis::parse_response(&raw, synthesizer, votes.controversial, contributions)
    }

    fn finalize(
        &self,
        state: &RunState,
        synthesis: &Synthesis,
        votes: &VoteResult,
        topology_name: &str,
        duration_ms: u64,
    ) {
        self.persist(state, "session index", |store| {
            store.append_index(IndexRow {
                session_id: state.session_id.clone(),
                timestamp: Utc::now(),
                question: state.input.clone(),
                winner: votes.winner.clone(),
                duration_ms,
            })
        });

        let arena = Arena::new(self.paths.arena_path());
        let scores: Vec<(String, f64)> = votes
            .rankings
            .iter()
            .map(|r| (r.provider.clone(), r.score))
            .collect();
        if let Err(e) = arena.record_outcome(&votes.winner, &scores) {
            self.warn(format!("arena update failed: {e}"));
        }

        let memory = MemoryGraph::new(self.paths.memory_path());
        let node = MemoryNode {
            session_id: state.session_id.clone(),
            input: state.input.clone(),
            tags: self.profile.focus.clone(),
            consensus_score: Some(synthesis.consensus_score),
            winner: Some(votes.winner.clone()),
            timestamp: Utc::now(),
        };
        if let Err(e) = memory.record(node) {
            self.warn(format!("memory update failed: {e}"));
        }
        for warning in memory.detect_contradictions(&synthesis.content, &state.memory_hits) {
            self.warn(warning);
        }

        let ledger = Ledger::new(self.paths.ledger_path());
        let entry = LedgerEntry {
            id: state.session_id.clone(),
            timestamp: Utc::now(),
            input: state.input.clone(),
            profile: self.profile.name.clone(),
            providers: self.roster(),
            topology: topology_name.to_string(),
            synthesis: synthesis.clone(),
            votes: votes.clone(),
            options: serde_json::json!({
                "rounds": self.profile.rounds,
                "voting_method": self.profile.voting_method,
                "evidence": self.profile.evidence,
            }),
            previous_hash: None,
            hash: String::new(),
        };
        if let Err(e) = ledger.append(entry) {
            self.warn(format!("ledger append failed: {e}"));
        }
    }
}

fn action_label(action: &AdaptiveAction) -> &'static str {
    match action {
        AdaptiveAction::Continue => "continue",
        AdaptiveAction::SkipPhases { .. } => "skip-phases",
        AdaptiveAction::AddRound => "add-round",
        AdaptiveAction::SkipToSynthesize => "skip-to-synthesize",
    }
}

fn degenerate_votes(
    candidates: &[String],
    winner: &str,
    method: crate::voting::VotingMethod,
    detail: &str,
) -> VoteResult {
    let mut rankings: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|c| ScoredCandidate {
            provider: c.clone(),
            score: 0.0,
        })
        .collect();
    if let Some(pos) = rankings.iter().position(|r| r.provider == winner) {
        let entry = rankings.remove(pos);
        rankings.insert(0, entry);
    }
    VoteResult {
        rankings,
        winner: winner.to_string(),
        controversial: false,
        method,
        details: BTreeMap::new(),
        voting_details: Some(detail.to_string()),
    }
}

fn override_winner(votes: &mut VoteResult, winner: &str) {
    if let Some(pos) = votes.rankings.iter().position(|r| r.provider == winner) {
        let entry = votes.rankings.remove(pos);
        votes.rankings.insert(0, entry);
    }
    votes.winner = winner.to_string();
    let note = "winner overridden at human checkpoint";
    votes.voting_details = Some(match votes.voting_details.take() {
        Some(existing) => format!("{existing}; {note}"),
        None => note.to_string(),
    });
}
