// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Declarative run policies.
//!
//! Policies are YAML documents evaluated before and after a deliberation.
//! Each rule carries an action: `log` and `warn` become events, `pause`
//! becomes a human checkpoint, `block` terminates the run before any
//! external call. Rules with a `when` pattern apply only when the input
//! matches it.
//!
//! ```yaml
//! name: baseline
//! version: 1
//! rules:
//!   - type: min_providers
//!     value: 3
//!     action: block
//!   - type: input_match
//!     pattern: "(?i)prod(uction)? credentials"
//!     action: pause
//!     message: sensitive input, confirm before dispatch
//!   - type: min_confidence
//!     value: 0.6
//!     action: warn
//! ```

use crate::error::{QuorumError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Severity attached to each rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Log,
    Warn,
    Pause,
    Block,
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyAction::Log => "log",
            PolicyAction::Warn => "warn",
            PolicyAction::Pause => "pause",
            PolicyAction::Block => "block",
        };
        write!(f, "{s}")
    }
}

/// Typed rule kinds.
#[derive(Debug, Clone)]
pub enum RuleKind {
    MinProviders(usize),
    MinConsensus(f64),
    MinConfidence(f64),
    RequireEvidence,
    BlockProviders(Vec<String>),
    HumanApproval,
    MaxDuration(u64),
    RequireRedTeam,
    InputMatch(Regex),
}

impl PartialEq for RuleKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuleKind::MinProviders(a), RuleKind::MinProviders(b)) => a == b,
            (RuleKind::MinConsensus(a), RuleKind::MinConsensus(b)) => a == b,
            (RuleKind::MinConfidence(a), RuleKind::MinConfidence(b)) => a == b,
            (RuleKind::RequireEvidence, RuleKind::RequireEvidence) => true,
            (RuleKind::BlockProviders(a), RuleKind::BlockProviders(b)) => a == b,
            (RuleKind::HumanApproval, RuleKind::HumanApproval) => true,
            (RuleKind::MaxDuration(a), RuleKind::MaxDuration(b)) => a == b,
            (RuleKind::RequireRedTeam, RuleKind::RequireRedTeam) => true,
            (RuleKind::InputMatch(a), RuleKind::InputMatch(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl RuleKind {
    /// The YAML `type` tag.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::MinProviders(_) => "min_providers",
            RuleKind::MinConsensus(_) => "min_consensus",
            RuleKind::MinConfidence(_) => "min_confidence",
            RuleKind::RequireEvidence => "require_evidence",
            RuleKind::BlockProviders(_) => "block_providers",
            RuleKind::HumanApproval => "human_approval",
            RuleKind::MaxDuration(_) => "max_duration",
            RuleKind::RequireRedTeam => "require_red_team",
            RuleKind::InputMatch(_) => "input_match",
        }
    }
}

/// One rule: kind + action + optional condition and override message.
#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: RuleKind,
    pub action: PolicyAction,
    /// Regex on the input; the rule applies only when it matches.
    pub when: Option<Regex>,
    pub message: Option<String>,
}

/// A named policy document.
#[derive(Debug, Clone)]
pub struct Policy {
    pub name: String,
    pub version: u32,
    pub rules: Vec<Rule>,
}

/// Raw YAML shape, converted to [`Policy`] with validation.
#[derive(Debug, Deserialize)]
struct PolicySpec {
    name: String,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    #[serde(rename = "type")]
    rule_type: String,
    #[serde(default)]
    value: Option<serde_yml::Value>,
    #[serde(default)]
    providers: Option<Vec<String>>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    when: Option<String>,
    action: PolicyAction,
    #[serde(default)]
    message: Option<String>,
}

impl RuleSpec {
    fn number(&self, policy: &str) -> Result<f64> {
        self.value
            .as_ref()
            .and_then(serde_yml::Value::as_f64)
            .ok_or_else(|| {
                QuorumError::Validation(format!(
                    "policy '{policy}': rule '{}' needs a numeric value",
                    self.rule_type
                ))
            })
    }

    fn into_rule(self, policy: &str) -> Result<Rule> {
        let kind = match self.rule_type.as_str() {
            "min_providers" => RuleKind::MinProviders(self.number(policy)? as usize),
            "min_consensus" => RuleKind::MinConsensus(self.number(policy)?),
            "min_confidence" => RuleKind::MinConfidence(self.number(policy)?),
            "require_evidence" => RuleKind::RequireEvidence,
            "block_providers" => RuleKind::BlockProviders(self.providers.clone().unwrap_or_default()),
            "human_approval" => RuleKind::HumanApproval,
            "max_duration" => RuleKind::MaxDuration(self.number(policy)? as u64),
            "require_red_team" => RuleKind::RequireRedTeam,
            "input_match" => {
                let pattern = self.pattern.as_deref().ok_or_else(|| {
                    QuorumError::Validation(format!(
                        "policy '{policy}': input_match needs a pattern"
                    ))
                })?;
                RuleKind::InputMatch(Regex::new(pattern).map_err(|e| {
                    QuorumError::Validation(format!("policy '{policy}': bad pattern: {e}"))
                })?)
            }
            other => {
                return Err(QuorumError::Validation(format!(
                    "policy '{policy}': unknown rule type '{other}'"
                )))
            }
        };
        let when = match &self.when {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                QuorumError::Validation(format!("policy '{policy}': bad when pattern: {e}"))
            })?),
            None => None,
        };
        Ok(Rule {
            kind,
            action: self.action,
            when,
            message: self.message,
        })
    }
}

/// A raised rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyViolation {
    pub policy: String,
    pub rule: String,
    pub action: PolicyAction,
    pub message: String,
}

/// Pre-deliberation facts the rules see.
#[derive(Debug, Clone)]
pub struct PreContext<'a> {
    pub input: &'a str,
    pub providers: &'a [String],
    pub red_team_enabled: bool,
    pub hitl_available: bool,
}

/// Post-deliberation facts the rules see.
#[derive(Debug, Clone)]
pub struct PostContext<'a> {
    pub input: &'a str,
    pub consensus_score: f64,
    pub confidence_score: f64,
    pub duration_secs: u64,
    pub evidence_enabled: bool,
}

/// All loaded policies, evaluated together unless scoped by name.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    #[must_use]
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    /// Parse one YAML document.
    pub fn parse(text: &str) -> Result<Policy> {
        let spec: PolicySpec = serde_yml::from_str(text)
            .map_err(|e| QuorumError::Validation(format!("invalid policy: {e}")))?;
        let name = spec.name.clone();
        let rules = spec
            .rules
            .into_iter()
            .map(|r| r.into_rule(&name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Policy {
            name,
            version: spec.version,
            rules,
        })
    }

    /// Read all `*.yaml`/`*.yml` files in the given directories, in order,
    /// de-duplicating by policy name (last wins).
    pub fn load(dirs: &[impl AsRef<Path>]) -> Result<Self> {
        let mut by_name: HashMap<String, (usize, Policy)> = HashMap::new();
        let mut counter = 0usize;
        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                continue;
            }
            let mut files: Vec<_> = std::fs::read_dir(dir)
                .map_err(|e| QuorumError::Persist(format!("read {}: {e}", dir.display())))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yaml" | "yml")
                    )
                })
                .collect();
            files.sort();
            for file in files {
                let text = std::fs::read_to_string(&file)
                    .map_err(|e| QuorumError::Persist(format!("read {}: {e}", file.display())))?;
                let policy = Self::parse(&text)?;
                by_name.insert(policy.name.clone(), (counter, policy));
                counter += 1;
            }
        }
        let mut ordered: Vec<(usize, Policy)> = by_name.into_values().collect();
        ordered.sort_by_key(|(i, _)| *i);
        Ok(Self {
            policies: ordered.into_iter().map(|(_, p)| p).collect(),
        })
    }

    /// Restrict evaluation to a single named policy.
    pub fn scoped(&self, name: &str) -> Result<Self> {
        let policy = self
            .policies
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| QuorumError::Config(format!("unknown policy '{name}'")))?;
        Ok(Self {
            policies: vec![policy],
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name.as_str()).collect()
    }

    /// Rules checked before any provider call.
    #[must_use]
    pub fn evaluate_pre(&self, ctx: &PreContext<'_>) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        for policy in &self.policies {
            for rule in &policy.rules {
                if !rule_applies(rule, ctx.input) {
                    continue;
                }
                let violated = match &rule.kind {
                    RuleKind::MinProviders(min) => (ctx.providers.len() < *min).then(|| {
                        format!("{} providers configured, {min} required", ctx.providers.len())
                    }),
                    RuleKind::BlockProviders(blocked) => {
                        let present: Vec<&String> = ctx
                            .providers
                            .iter()
                            .filter(|p| blocked.contains(p))
                            .collect();
                        (!present.is_empty()).then(|| {
                            format!(
                                "blocked providers in roster: {}",
                                present
                                    .iter()
                                    .map(|s| s.as_str())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            )
                        })
                    }
                    RuleKind::InputMatch(pattern) => pattern
                        .is_match(ctx.input)
                        .then(|| format!("input matches /{}/", pattern.as_str())),
                    RuleKind::HumanApproval => Some(if ctx.hitl_available {
                        "human approval required before dispatch".to_string()
                    } else {
                        "human approval required but no handler is attached".to_string()
                    }),
                    RuleKind::RequireRedTeam => (!ctx.red_team_enabled)
                        .then(|| "red-team phase required but not enabled".to_string()),
                    _ => None,
                };
                if let Some(detail) = violated {
                    violations.push(violation(policy, rule, detail));
                }
            }
        }
        violations
    }

    /// Rules checked against the synthesized result.
    #[must_use]
    pub fn evaluate_post(&self, ctx: &PostContext<'_>) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        for policy in &self.policies {
            for rule in &policy.rules {
                if !rule_applies(rule, ctx.input) {
                    continue;
                }
                let violated = match &rule.kind {
                    RuleKind::MinConsensus(min) => (ctx.consensus_score < *min).then(|| {
                        format!("consensus {:.2} below {min:.2}", ctx.consensus_score)
                    }),
                    RuleKind::MinConfidence(min) => (ctx.confidence_score < *min).then(|| {
                        format!("confidence {:.2} below {min:.2}", ctx.confidence_score)
                    }),
                    RuleKind::MaxDuration(max) => (ctx.duration_secs > *max)
                        .then(|| format!("run took {}s, limit {max}s", ctx.duration_secs)),
                    RuleKind::RequireEvidence => (!ctx.evidence_enabled)
                        .then(|| "evidence scoring required but disabled".to_string()),
                    _ => None,
                };
                if let Some(detail) = violated {
                    violations.push(violation(policy, rule, detail));
                }
            }
        }
        violations
    }
}

fn rule_applies(rule: &Rule, input: &str) -> bool {
    rule.when.as_ref().map_or(true, |w| w.is_match(input))
}

fn violation(policy: &Policy, rule: &Rule, detail: String) -> PolicyViolation {
    PolicyViolation {
        policy: policy.name.clone(),
        rule: rule.kind.type_name().to_string(),
        action: rule.action,
        message: rule.message.clone().unwrap_or(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASELINE: &str = r#"
name: baseline
version: 2
rules:
  - type: min_providers
    value: 3
    action: block
  - type: input_match
    pattern: "(?i)credentials"
    action: pause
    message: sensitive input
  - type: min_confidence
    value: 0.6
    action: warn
  - type: max_duration
    value: 60
    action: log
"#;

    fn providers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_and_pre_evaluation() {
        let set = PolicySet::new(vec![PolicySet::parse(BASELINE).unwrap()]);
        let roster = providers(&["a", "b"]);
        let violations = set.evaluate_pre(&PreContext {
            input: "rotate the production credentials",
            providers: &roster,
            red_team_enabled: false,
            hitl_available: true,
        });
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].action, PolicyAction::Block);
        assert_eq!(violations[1].action, PolicyAction::Pause);
        assert_eq!(violations[1].message, "sensitive input");
    }

    #[test]
    fn test_post_evaluation_thresholds() {
        let set = PolicySet::new(vec![PolicySet::parse(BASELINE).unwrap()]);
        let violations = set.evaluate_post(&PostContext {
            input: "plain question",
            consensus_score: 0.9,
            confidence_score: 0.4,
            duration_secs: 120,
            evidence_enabled: false,
        });
        let rules: Vec<&str> = violations.iter().map(|v| v.rule.as_str()).collect();
        assert_eq!(rules, vec!["min_confidence", "max_duration"]);
        assert_eq!(violations[0].action, PolicyAction::Warn);
        assert_eq!(violations[1].action, PolicyAction::Log);
    }

    #[test]
    fn test_when_condition_gates_rule() {
        let text = r#"
name: scoped
rules:
  - type: min_providers
    value: 10
    when: "(?i)legal"
    action: block
"#;
        let set = PolicySet::new(vec![PolicySet::parse(text).unwrap()]);
        let roster = providers(&["a", "b"]);
        assert!(set
            .evaluate_pre(&PreContext {
                input: "ordinary question",
                providers: &roster,
                red_team_enabled: false,
                hitl_available: false,
            })
            .is_empty());
        assert_eq!(
            set.evaluate_pre(&PreContext {
                input: "a legal question",
                providers: &roster,
                red_team_enabled: false,
                hitl_available: false,
            })
            .len(),
            1
        );
    }

    #[test]
    fn test_load_dedupes_last_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(
            a.join("base.yaml"),
            "name: base\nrules:\n  - {type: min_providers, value: 2, action: block}\n",
        )
        .unwrap();
        std::fs::write(
            b.join("override.yaml"),
            "name: base\nrules:\n  - {type: min_providers, value: 5, action: warn}\n",
        )
        .unwrap();

        let set = PolicySet::load(&[a, b]).unwrap();
        assert_eq!(set.names(), vec!["base"]);
        let roster = providers(&["a", "b", "c"]);
        let violations = set.evaluate_pre(&PreContext {
            input: "q",
            providers: &roster,
            red_team_enabled: false,
            hitl_available: false,
        });
        // The later directory's definition won: threshold 5, action warn.
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].action, PolicyAction::Warn);
    }

    #[test]
    fn test_unknown_rule_type_rejected() {
        let text = "name: bad\nrules:\n  - {type: teleport, action: warn}\n";
        assert!(PolicySet::parse(text).is_err());
    }

    #[test]
    fn test_scoped_selects_one_policy() {
        let set = PolicySet::new(vec![
            PolicySet::parse("name: one\nrules: []\n").unwrap(),
            PolicySet::parse("name: two\nrules: []\n").unwrap(),
        ]);
        assert_eq!(set.scoped("two").unwrap().names(), vec!["two"]);
        assert!(set.scoped("three").is_err());
    }
}
