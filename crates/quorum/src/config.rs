// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Provider and runtime configuration.
//!
//! A deliberation is configured from a YAML document listing providers and a
//! default profile name. Credentials are never stored inline by default;
//! each provider carries an [`AuthSpec`] that the [`CredentialResolver`]
//! (and only it) turns into a secret at call time.
//!
//! Filesystem locations are an explicit [`Paths`] value passed in from the
//! outside; the library reads no hidden globals.

use crate::error::{QuorumError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identity and transport settings for one upstream model.
///
/// Immutable during a deliberation; `name` is unique within a roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Roster-unique display name, e.g. `"gpt"`, `"claude"`.
    pub name: String,
    /// Adapter registry key, e.g. `"openai"`, `"mock"`.
    pub kind: String,
    /// Upstream model identifier.
    pub model: String,
    /// How to obtain the API credential.
    #[serde(default)]
    pub auth: AuthSpec,
    /// Override for the provider's API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-call deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Context window in tokens; used by the budgeter. Defaults to 128k.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,
    /// Static vote weight applied to this provider as a candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl ProviderConfig {
    /// Effective per-call deadline.
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(120)
    }

    /// Effective context window in tokens.
    #[must_use]
    pub fn context_window(&self) -> usize {
        self.context_window.unwrap_or(128_000)
    }
}

/// Where a provider credential comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AuthSpec {
    /// No credential (local or mock providers).
    #[default]
    None,
    /// Read from an environment variable at call time.
    Env { var: String },
    /// Inline token. Discouraged outside tests.
    Token { token: String },
    /// System keychain service entry (macOS `security`).
    Keychain { service: String },
}

/// Resolves an [`AuthSpec`] to a secret.
///
/// The resolver is the only component that reads the environment, the OAuth
/// store, or the keychain; everything else treats [`AuthSpec`] as opaque.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, spec: &AuthSpec) -> Result<Option<String>>;
}

/// Default resolver: environment variables and inline tokens.
///
/// Keychain specs resolve through the `security` binary on macOS and fail
/// with a config error elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, spec: &AuthSpec) -> Result<Option<String>> {
        match spec {
            AuthSpec::None => Ok(None),
            AuthSpec::Token { token } => Ok(Some(token.clone())),
            AuthSpec::Env { var } => std::env::var(var).map(Some).map_err(|_| {
                QuorumError::Config(format!("environment variable '{var}' is not set"))
            }),
            AuthSpec::Keychain { service } => {
                if !cfg!(target_os = "macos") {
                    return Err(QuorumError::Config(format!(
                        "keychain auth for '{service}' requires macOS"
                    )));
                }
                let output = std::process::Command::new("security")
                    .args(["find-generic-password", "-s", service, "-w"])
                    .output()
                    .map_err(|e| QuorumError::Config(format!("keychain lookup failed: {e}")))?;
                if !output.status.success() {
                    return Err(QuorumError::Config(format!(
                        "keychain entry '{service}' not found"
                    )));
                }
                Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
            }
        }
    }
}

/// Filesystem layout for all cross-session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paths {
    /// Base directory, conventionally `~/.quorum`.
    pub base_dir: PathBuf,
}

impl Paths {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Per-run session directories live here.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    /// Global session index file.
    #[must_use]
    pub fn session_index(&self) -> PathBuf {
        self.base_dir.join("sessions").join("index.json")
    }

    /// Cross-session ledger file.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.base_dir.join("ledger.json")
    }

    /// Memory graph store.
    #[must_use]
    pub fn memory_path(&self) -> PathBuf {
        self.base_dir.join("memory.json")
    }

    /// Arena reputation store.
    #[must_use]
    pub fn arena_path(&self) -> PathBuf {
        self.base_dir.join("arena.json")
    }

    /// Directories searched for policy YAML files, in evaluation order.
    #[must_use]
    pub fn policy_dirs(&self) -> Vec<PathBuf> {
        vec![self.base_dir.join("policies")]
    }

    /// Directory holding named profiles.
    #[must_use]
    pub fn profiles_dir(&self) -> PathBuf {
        self.base_dir.join("profiles")
    }

    /// Directory holding red-team attack packs.
    #[must_use]
    pub fn attacks_dir(&self) -> PathBuf {
        self.base_dir.join("attacks")
    }
}

/// Top-level YAML configuration document.
///
/// ```yaml
/// default_profile: balanced
/// providers:
///   - name: gpt
///     kind: openai
///     model: gpt-4o
///     auth: { source: env, var: OPENAI_API_KEY }
///   - name: claude
///     kind: openai
///     model: claude-sonnet-4
///     base_url: https://gateway.internal/v1
///     auth: { source: env, var: GATEWAY_API_KEY }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuorumConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Name of the profile used when the CLI does not select one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}

impl QuorumConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuorumError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_yml::from_str(&text)
            .map_err(|e| QuorumError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check roster-level invariants once, after all layers merged.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(QuorumError::Validation("provider with empty name".into()));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(QuorumError::Validation(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            if provider.model.trim().is_empty() {
                return Err(QuorumError::Validation(format!(
                    "provider '{}' has no model",
                    provider.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a provider by roster name.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            kind: "mock".into(),
            model: "test-model".into(),
            auth: AuthSpec::None,
            base_url: None,
            timeout_secs: None,
            context_window: None,
            weight: None,
        }
    }

    #[test]
    fn test_duplicate_provider_names_rejected() {
        let config = QuorumConfig {
            providers: vec![provider("gpt"), provider("gpt")],
            default_profile: None,
        };
        assert!(matches!(
            config.validate(),
            Err(QuorumError::Validation(_))
        ));
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
default_profile: balanced
providers:
  - name: gpt
    kind: openai
    model: gpt-4o
    auth: { source: env, var: OPENAI_API_KEY }
  - name: local
    kind: mock
    model: echo
"#;
        let config: QuorumConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.default_profile.as_deref(), Some("balanced"));
        assert_eq!(
            config.provider("gpt").unwrap().auth,
            AuthSpec::Env {
                var: "OPENAI_API_KEY".into()
            }
        );
        assert_eq!(config.provider("local").unwrap().auth, AuthSpec::None);
    }

    #[test]
    fn test_env_resolver_reads_token_inline() {
        let resolver = EnvCredentialResolver;
        let secret = resolver
            .resolve(&AuthSpec::Token {
                token: "sk-test".into(),
            })
            .unwrap();
        assert_eq!(secret.as_deref(), Some("sk-test"));
        assert!(resolver.resolve(&AuthSpec::None).unwrap().is_none());
    }

    #[test]
    fn test_paths_layout() {
        let paths = Paths::new("/tmp/q");
        assert_eq!(paths.ledger_path(), PathBuf::from("/tmp/q/ledger.json"));
        assert_eq!(
            paths.session_index(),
            PathBuf::from("/tmp/q/sessions/index.json")
        );
    }

    #[test]
    fn test_provider_defaults() {
        let p = provider("x");
        assert_eq!(p.timeout_secs(), 120);
        assert_eq!(p.context_window(), 128_000);
    }
}
