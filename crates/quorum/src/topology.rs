// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Debate topologies.
//!
//! A topology is a pure function from `(roster, profile)` to a
//! [`TopologyPlan`]: an ordered list of phase specs with participants and
//! per-participant visibility. One generic executor in the engine consumes
//! any plan, so the named topologies stay declarative.
//!
//! Built-ins: `mesh` (the canonical pipeline), `star`, `tournament`,
//! `map_reduce`, `adversarial_tree`, `pipeline`, `panel`.

use crate::error::{QuorumError, Result};
use crate::phases::{self, names, PromptCtx};
use crate::profile::AgentProfile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A prompt builder; captures the profile it was planned from.
pub type PromptFn = Arc<dyn Fn(&PromptCtx) -> String + Send + Sync>;

/// Who synthesizes at the end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SynthesizerChoice {
    /// Engine picks the vote runner-up (falls back to the first adapter).
    Auto,
    /// A fixed provider, e.g. a topology's judge or moderator.
    Provider(String),
}

/// One planned phase.
#[derive(Clone)]
pub struct PhaseSpec {
    pub name: String,
    /// Whether participants run concurrently.
    pub parallel: bool,
    /// Roster names taking part, in roster order.
    pub participants: Vec<String>,
    /// Which providers each participant may read (their latest responses).
    pub visibility: HashMap<String, Vec<String>>,
    pub system_prompt: PromptFn,
    pub user_prompt: PromptFn,
}

impl std::fmt::Debug for PhaseSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseSpec")
            .field("name", &self.name)
            .field("parallel", &self.parallel)
            .field("participants", &self.participants)
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// The expanded plan the engine executes.
#[derive(Debug, Clone)]
pub struct TopologyPlan {
    pub topology: String,
    pub description: String,
    pub phases: Vec<PhaseSpec>,
    pub voting_enabled: bool,
    pub synthesizer: SynthesizerChoice,
}

/// Serializable projection of a plan (closures omitted), persisted as
/// `topology-plan.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyPlanRecord {
    pub topology: String,
    pub description: String,
    pub phases: Vec<PhaseSpecRecord>,
    pub voting_enabled: bool,
    pub synthesizer: SynthesizerChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSpecRecord {
    pub name: String,
    pub parallel: bool,
    pub participants: Vec<String>,
    pub visibility: HashMap<String, Vec<String>>,
}

impl TopologyPlan {
    #[must_use]
    pub fn to_record(&self) -> TopologyPlanRecord {
        TopologyPlanRecord {
            topology: self.topology.clone(),
            description: self.description.clone(),
            phases: self
                .phases
                .iter()
                .map(|p| PhaseSpecRecord {
                    name: p.name.clone(),
                    parallel: p.parallel,
                    participants: p.participants.clone(),
                    visibility: p.visibility.clone(),
                })
                .collect(),
            voting_enabled: self.voting_enabled,
            synthesizer: self.synthesizer.clone(),
        }
    }

    /// Check participant and visibility sets against the roster.
    pub fn validate(&self, roster: &[String]) -> Result<()> {
        for phase in &self.phases {
            for participant in &phase.participants {
                if !roster.contains(participant) {
                    return Err(QuorumError::Validation(format!(
                        "topology '{}': phase '{}' names unknown participant '{participant}'",
                        self.topology, phase.name
                    )));
                }
            }
            for (participant, visible) in &phase.visibility {
                if !phase.participants.contains(participant) {
                    return Err(QuorumError::Validation(format!(
                        "topology '{}': phase '{}' has visibility for non-participant '{participant}'",
                        self.topology, phase.name
                    )));
                }
                for name in visible {
                    if !roster.contains(name) {
                        return Err(QuorumError::Validation(format!(
                            "topology '{}': phase '{}' visibility names unknown provider '{name}'",
                            self.topology, phase.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Names of the built-in topologies.
pub const BUILTIN_TOPOLOGIES: &[&str] = &[
    "mesh",
    "star",
    "tournament",
    "map_reduce",
    "adversarial_tree",
    "pipeline",
    "panel",
];

/// Expand a named topology over the roster.
pub fn plan(topology: &str, roster: &[String], profile: &AgentProfile) -> Result<TopologyPlan> {
    if roster.len() < 2 {
        return Err(QuorumError::Validation(
            "a topology needs at least two providers".into(),
        ));
    }
    let plan = match topology {
        "mesh" => mesh(roster, profile),
        "star" => star(roster, profile)?,
        "tournament" => tournament(roster, profile),
        "map_reduce" => map_reduce(roster, profile)?,
        "adversarial_tree" => adversarial_tree(roster, profile)?,
        "pipeline" => pipeline(roster, profile),
        "panel" => panel(roster, profile)?,
        other => {
            return Err(QuorumError::Config(format!(
                "unknown topology '{other}' (built-ins: {})",
                BUILTIN_TOPOLOGIES.join(", ")
            )))
        }
    };
    plan.validate(roster)?;
    Ok(plan)
}

/// Prompt functions for a phase: the profile's template override when
/// present, else the canonical defaults.
fn prompts_for(phase: &str, profile: &AgentProfile) -> (PromptFn, PromptFn) {
    let system: PromptFn = Arc::new(phases::default_system);
    let user: PromptFn = match profile.prompts.get(phase) {
        Some(template) => {
            let template = template.clone();
            Arc::new(move |ctx: &PromptCtx| render_template(&template, ctx))
        }
        None => Arc::new(phases::default_user),
    };
    (system, user)
}

/// Substitute `{input}`, `{participant}`, `{round}`, and `{responses}` in a
/// profile-supplied template.
#[must_use]
pub fn render_template(template: &str, ctx: &PromptCtx) -> String {
    let responses = ctx
        .visible
        .iter()
        .map(|(label, text)| format!("--- {label} ---\n{text}"))
        .collect::<Vec<_>>()
        .join("\n\n");
    template
        .replace("{input}", &ctx.input)
        .replace("{participant}", &ctx.participant)
        .replace("{round}", &ctx.round.to_string())
        .replace("{responses}", &responses)
}

fn all_see_all(participants: &[String]) -> HashMap<String, Vec<String>> {
    participants
        .iter()
        .map(|p| (p.clone(), participants.to_vec()))
        .collect()
}

fn no_visibility(participants: &[String]) -> HashMap<String, Vec<String>> {
    participants
        .iter()
        .map(|p| (p.clone(), Vec::new()))
        .collect()
}

fn spec(
    name: &str,
    parallel: bool,
    participants: Vec<String>,
    visibility: HashMap<String, Vec<String>>,
    profile: &AgentProfile,
) -> PhaseSpec {
    let (system_prompt, user_prompt) = prompts_for(name, profile);
    PhaseSpec {
        name: name.to_string(),
        parallel,
        participants,
        visibility,
        system_prompt,
        user_prompt,
    }
}

/// Provider holding a role in the profile's role map.
fn role_provider(profile: &AgentProfile, roster: &[String], role: &str) -> Result<String> {
    profile
        .roles
        .iter()
        .find(|(provider, r)| r.as_str() == role && roster.contains(provider))
        .map(|(provider, _)| provider.clone())
        .ok_or_else(|| {
            QuorumError::Validation(format!(
                "topology requires a provider with role '{role}' in the roster"
            ))
        })
}

/// The canonical 7-phase pipeline; everyone sees everyone each phase.
fn mesh(roster: &[String], profile: &AgentProfile) -> TopologyPlan {
    let all = roster.to_vec();
    let phase_names = profile.phases.clone().unwrap_or_else(|| {
        vec![
            names::GATHER.into(),
            names::PLAN.into(),
            names::FORMULATE.into(),
            names::DEBATE.into(),
            names::ADJUST.into(),
            names::REBUTTAL.into(),
            names::VOTE.into(),
        ]
    });
    let phases = phase_names
        .iter()
        .map(|name| spec(name, true, all.clone(), all_see_all(&all), profile))
        .collect();
    TopologyPlan {
        topology: "mesh".into(),
        description: "full visibility: every participant reads every other each phase".into(),
        phases,
        voting_enabled: phase_names.iter().any(|p| p == names::VOTE),
        synthesizer: SynthesizerChoice::Auto,
    }
}

/// A hub frames the problem, spokes respond to the hub, the hub aggregates.
fn star(roster: &[String], profile: &AgentProfile) -> Result<TopologyPlan> {
    let hub = role_provider(profile, roster, "hub")?;
    let spokes: Vec<String> = roster.iter().filter(|p| **p != hub).cloned().collect();
    let all = roster.to_vec();

    let mut spoke_visibility = HashMap::new();
    for s in &spokes {
        spoke_visibility.insert(s.clone(), vec![hub.clone()]);
    }
    let mut hub_sees_spokes = HashMap::new();
    hub_sees_spokes.insert(hub.clone(), spokes.clone());

    Ok(TopologyPlan {
        topology: "star".into(),
        description: format!("hub '{hub}' fans out to {} spokes and aggregates", spokes.len()),
        phases: vec![
            spec(names::PLAN, false, vec![hub.clone()], no_visibility(&[hub.clone()]), profile),
            spec(names::FORMULATE, true, spokes.clone(), spoke_visibility, profile),
            spec(names::ADJUST, false, vec![hub.clone()], hub_sees_spokes, profile),
            spec(names::VOTE, true, all.clone(), all_see_all(&all), profile),
        ],
        voting_enabled: true,
        synthesizer: SynthesizerChoice::Auto,
    })
}

/// Adjacent roster pairs debate head-to-head; the vote eliminates.
fn tournament(roster: &[String], profile: &AgentProfile) -> TopologyPlan {
    let all = roster.to_vec();
    let mut bracket_visibility = HashMap::new();
    for pair in roster.chunks(2) {
        match pair {
            [a, b] => {
                bracket_visibility.insert(a.clone(), vec![b.clone()]);
                bracket_visibility.insert(b.clone(), vec![a.clone()]);
            }
            [odd] => {
                // Odd entrant gets a bye and debates the first seed.
                bracket_visibility.insert(odd.clone(), vec![all[0].clone()]);
            }
            _ => {}
        }
    }
    TopologyPlan {
        topology: "tournament".into(),
        description: "pairwise bracket; the ranked vote performs elimination".into(),
        phases: vec![
            spec(names::FORMULATE, true, all.clone(), no_visibility(&all), profile),
            spec(names::DEBATE, true, all.clone(), bracket_visibility, profile),
            spec(names::ADJUST, true, all.clone(), all_see_all(&all), profile),
            spec(names::VOTE, true, all.clone(), all_see_all(&all), profile),
        ],
        voting_enabled: true,
        synthesizer: SynthesizerChoice::Auto,
    }
}

/// Parallel map over all providers, serial reduce by the `reducer` role.
fn map_reduce(roster: &[String], profile: &AgentProfile) -> Result<TopologyPlan> {
    let reducer = role_provider(profile, roster, "reducer")
        .or_else(|_| role_provider(profile, roster, "hub"))?;
    let mappers: Vec<String> = roster.iter().filter(|p| **p != reducer).cloned().collect();
    let mut reducer_sees_all = HashMap::new();
    reducer_sees_all.insert(reducer.clone(), mappers.clone());

    Ok(TopologyPlan {
        topology: "map_reduce".into(),
        description: format!("parallel map across {} providers, reduce by '{reducer}'", mappers.len()),
        phases: vec![
            spec(names::FORMULATE, true, mappers.clone(), no_visibility(&mappers), profile),
            spec(names::ADJUST, false, vec![reducer.clone()], reducer_sees_all, profile),
        ],
        voting_enabled: false,
        synthesizer: SynthesizerChoice::Provider(reducer),
    })
}

/// Proponent and opponent branches argued before a judge.
fn adversarial_tree(roster: &[String], profile: &AgentProfile) -> Result<TopologyPlan> {
    let proponent = role_provider(profile, roster, "proponent")?;
    let opponent = role_provider(profile, roster, "opponent")?;
    let judge = role_provider(profile, roster, "judge")?;
    let sides = vec![proponent.clone(), opponent.clone()];

    let mut cross = HashMap::new();
    cross.insert(proponent.clone(), vec![opponent.clone()]);
    cross.insert(opponent.clone(), vec![proponent.clone()]);
    let mut judge_sees_sides = HashMap::new();
    judge_sees_sides.insert(judge.clone(), sides.clone());

    Ok(TopologyPlan {
        topology: "adversarial_tree".into(),
        description: format!("'{proponent}' vs '{opponent}', judged by '{judge}'"),
        phases: vec![
            spec(names::FORMULATE, true, sides.clone(), no_visibility(&sides), profile),
            spec(names::DEBATE, true, sides.clone(), cross.clone(), profile),
            spec(names::REBUTTAL, true, sides, cross, profile),
            spec(names::ADJUST, false, vec![judge.clone()], judge_sees_sides, profile),
        ],
        voting_enabled: false,
        synthesizer: SynthesizerChoice::Provider(judge),
    })
}

/// Serial stages; each stage sees only its predecessor.
fn pipeline(roster: &[String], profile: &AgentProfile) -> TopologyPlan {
    let phases = roster
        .iter()
        .enumerate()
        .map(|(i, provider)| {
            let mut visibility = HashMap::new();
            let upstream = if i == 0 {
                Vec::new()
            } else {
                vec![roster[i - 1].clone()]
            };
            visibility.insert(provider.clone(), upstream);
            spec(
                &format!("STAGE_{}", i + 1),
                false,
                vec![provider.clone()],
                visibility,
                profile,
            )
        })
        .collect();
    TopologyPlan {
        topology: "pipeline".into(),
        description: "serial stages, each visible only to the next".into(),
        phases,
        voting_enabled: false,
        synthesizer: SynthesizerChoice::Auto,
    }
}

/// A moderator frames, speakers answer in order, the moderator closes.
fn panel(roster: &[String], profile: &AgentProfile) -> Result<TopologyPlan> {
    let moderator = role_provider(profile, roster, "moderator")?;
    let speakers: Vec<String> = roster.iter().filter(|p| **p != moderator).cloned().collect();

    let mut phases = vec![spec(
        names::PLAN,
        false,
        vec![moderator.clone()],
        no_visibility(&[moderator.clone()]),
        profile,
    )];
    // Ordered speakers: each sees the moderator and everyone before them.
    for (i, speaker) in speakers.iter().enumerate() {
        let mut sees = vec![moderator.clone()];
        sees.extend(speakers[..i].iter().cloned());
        let mut visibility = HashMap::new();
        visibility.insert(speaker.clone(), sees);
        phases.push(spec(
            &format!("SPEAKER_{}", i + 1),
            false,
            vec![speaker.clone()],
            visibility,
            profile,
        ));
    }
    let mut moderator_sees_all = HashMap::new();
    moderator_sees_all.insert(moderator.clone(), speakers.clone());
    phases.push(spec(
        names::ADJUST,
        false,
        vec![moderator.clone()],
        moderator_sees_all,
        profile,
    ));

    Ok(TopologyPlan {
        topology: "panel".into(),
        description: format!("moderator '{moderator}' orchestrates {} speakers", speakers.len()),
        phases,
        voting_enabled: false,
        synthesizer: SynthesizerChoice::Provider(moderator),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn profile_with_roles(roles: &[(&str, &str)]) -> AgentProfile {
        let mut profile = AgentProfile::default();
        for (provider, role) in roles {
            profile.roles.insert((*provider).to_string(), (*role).to_string());
        }
        profile
    }

    #[test]
    fn test_mesh_is_canonical_pipeline() {
        let r = roster(&["a", "b", "c"]);
        let plan = plan("mesh", &r, &AgentProfile::default()).unwrap();
        let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["GATHER", "PLAN", "FORMULATE", "DEBATE", "ADJUST", "REBUTTAL", "VOTE"]
        );
        assert!(plan.voting_enabled);
        // Everyone sees everyone.
        for phase in &plan.phases {
            assert_eq!(phase.participants, r);
            for p in &r {
                assert_eq!(phase.visibility[p], r);
            }
        }
    }

    #[test]
    fn test_all_builtins_validate_with_roles() {
        let r = roster(&["a", "b", "c", "d"]);
        for topology in ["mesh", "tournament", "pipeline"] {
            plan(topology, &r, &AgentProfile::default()).unwrap();
        }
        plan("star", &r, &profile_with_roles(&[("a", "hub")])).unwrap();
        plan("map_reduce", &r, &profile_with_roles(&[("a", "reducer")])).unwrap();
        plan("panel", &r, &profile_with_roles(&[("a", "moderator")])).unwrap();
        plan(
            "adversarial_tree",
            &r,
            &profile_with_roles(&[("b", "proponent"), ("c", "opponent"), ("d", "judge")]),
        )
        .unwrap();
    }

    #[test]
    fn test_visibility_subsets_of_roster() {
        let r = roster(&["a", "b", "c", "d", "e"]);
        let profiles: Vec<AgentProfile> = vec![
            AgentProfile::default(),
            profile_with_roles(&[("a", "hub")]),
            profile_with_roles(&[("a", "reducer")]),
            profile_with_roles(&[("a", "moderator")]),
            profile_with_roles(&[("a", "proponent"), ("b", "opponent"), ("c", "judge")]),
        ];
        for topology in BUILTIN_TOPOLOGIES {
            let built = profiles
                .iter()
                .find_map(|p| plan(topology, &r, p).ok())
                .unwrap_or_else(|| panic!("no profile builds {topology}"));
            for phase in &built.phases {
                for (participant, visible) in &phase.visibility {
                    assert!(phase.participants.contains(participant));
                    for v in visible {
                        assert!(r.contains(v), "{topology}/{}: {v} not in roster", phase.name);
                    }
                }
            }
        }
    }

    #[test]
    fn test_star_requires_hub_role() {
        let r = roster(&["a", "b"]);
        assert!(plan("star", &r, &AgentProfile::default()).is_err());
    }

    #[test]
    fn test_pipeline_stages_are_serial_chain() {
        let r = roster(&["a", "b", "c"]);
        let built = plan("pipeline", &r, &AgentProfile::default()).unwrap();
        assert_eq!(built.phases.len(), 3);
        assert!(!built.phases[0].parallel);
        assert!(built.phases[0].visibility["a"].is_empty());
        assert_eq!(built.phases[1].visibility["b"], vec!["a"]);
        assert_eq!(built.phases[2].visibility["c"], vec!["b"]);
        assert!(!built.voting_enabled);
    }

    #[test]
    fn test_tournament_pairs_and_bye() {
        let r = roster(&["a", "b", "c"]);
        let built = plan("tournament", &r, &AgentProfile::default()).unwrap();
        let debate = &built.phases[1];
        assert_eq!(debate.visibility["a"], vec!["b"]);
        assert_eq!(debate.visibility["b"], vec!["a"]);
        // Odd entrant debates the first seed.
        assert_eq!(debate.visibility["c"], vec!["a"]);
    }

    #[test]
    fn test_unknown_topology_rejected() {
        let r = roster(&["a", "b"]);
        let err = plan("ring", &r, &AgentProfile::default()).unwrap_err();
        assert!(err.to_string().contains("ring"));
    }

    #[test]
    fn test_template_override_renders() {
        let mut profile = AgentProfile::default();
        profile.prompts.insert(
            names::GATHER.to_string(),
            "Q={input} P={participant} R={round}".to_string(),
        );
        let built = plan("mesh", &roster(&["a", "b"]), &profile).unwrap();
        let ctx = PromptCtx {
            input: "why".into(),
            participant: "a".into(),
            round: 1,
            phase: names::GATHER.into(),
            ..Default::default()
        };
        assert_eq!((built.phases[0].user_prompt)(&ctx), "Q=why P=a R=1");
        // Non-overridden phases keep the canonical template.
        let plan_prompt = (built.phases[1].user_prompt)(&ctx);
        assert!(plan_prompt.contains("why"));
    }

    #[test]
    fn test_plan_record_serializes() {
        let built = plan("mesh", &roster(&["a", "b"]), &AgentProfile::default()).unwrap();
        let record = built.to_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: TopologyPlanRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
