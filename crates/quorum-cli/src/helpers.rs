// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Shared command plumbing: configuration discovery and engine assembly.

use anyhow::{bail, Context, Result};
use quorum::config::{EnvCredentialResolver, Paths, ProviderConfig, QuorumConfig};
use quorum::engine::{DeliberationEngine, EngineOptions};
use quorum::policy::PolicySet;
use quorum::profile::{AgentProfile, ProfileOverrides};
use quorum::providers::AdapterRegistry;
use quorum::session::SessionStore;
use std::path::PathBuf;

/// Resolved filesystem environment for one invocation.
pub struct Environment {
    pub paths: Paths,
    pub config: QuorumConfig,
}

impl Environment {
    /// Resolve `--base-dir`/`--config` against the `~/.quorum` default.
    pub fn resolve(base_dir: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<Self> {
        let base_dir = match base_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("cannot determine home directory; pass --base-dir")?
                .join(".quorum"),
        };
        let paths = Paths::new(base_dir);
        let config_path = config_path.unwrap_or_else(|| paths.base_dir.join("config.yaml"));
        let config = if config_path.is_file() {
            QuorumConfig::load(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?
        } else {
            QuorumConfig::default()
        };
        Ok(Self { paths, config })
    }

    /// Load a named profile: `<base>/profiles/<name>.yaml`, the config's
    /// default, or the builtin defaults.
    pub fn profile(&self, name: Option<&str>) -> Result<AgentProfile> {
        let name = name
            .map(str::to_string)
            .or_else(|| self.config.default_profile.clone());
        match name {
            Some(name) => {
                let path = self.paths.profiles_dir().join(format!("{name}.yaml"));
                if path.is_file() {
                    Ok(AgentProfile::load(&path)?)
                } else {
                    bail!(
                        "profile '{name}' not found at {}",
                        path.display()
                    )
                }
            }
            None => Ok(AgentProfile::default()),
        }
    }

    /// Build an engine over the configured providers.
    pub fn engine(
        &self,
        providers: &[ProviderConfig],
        profile: AgentProfile,
        overrides: &ProfileOverrides,
        options: EngineOptions,
    ) -> Result<DeliberationEngine> {
        if providers.is_empty() {
            bail!("no providers configured; add them to config.yaml");
        }
        let profile = profile.with_overrides(overrides)?;
        let registry = AdapterRegistry::default();
        let adapters = registry.build_all(providers, &EnvCredentialResolver)?;
        let policies = PolicySet::load(&self.paths.policy_dirs())?;
        Ok(DeliberationEngine::new(adapters, profile, self.paths.clone())?
            .with_policies(policies)
            .with_options(options))
    }

    /// Open a session directory by id.
    pub fn session(&self, id: &str) -> Result<SessionStore> {
        Ok(SessionStore::open(self.paths.sessions_dir().join(id))?)
    }
}
