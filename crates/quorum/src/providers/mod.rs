// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Provider adapters: the uniform contract over heterogeneous model APIs.
//!
//! The engine talks to every upstream through [`ProviderAdapter`]. Streaming
//! is an optional capability probed with [`ProviderAdapter::supports_streaming`]
//! rather than a subtype. [`AdapterRegistry`] maps a configured provider
//! `kind` to a constructor, so external crates can plug in their own clients
//! without the engine knowing about them.

mod http;
mod mock;

pub use http::ChatCompletionsAdapter;
pub use mock::{MockAdapter, MockReply};

use crate::config::{CredentialResolver, ProviderConfig};
use crate::error::{QuorumError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with each streamed text delta.
pub type DeltaFn = Arc<dyn Fn(&str) + Send + Sync>;

/// A live handle bound to one [`ProviderConfig`].
///
/// Created once per deliberation and used from a single task at a time.
/// `generate` returns non-empty text on success or an error; empty responses
/// are treated as failures by the engine's retry loop.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Roster name this adapter answers for.
    fn name(&self) -> &str;

    /// The configuration the adapter was built from.
    fn config(&self) -> &ProviderConfig;

    /// One blocking completion call.
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String>;

    /// Whether [`ProviderAdapter::generate_stream`] emits incremental deltas.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Streamed completion; emits partial text through `on_delta` and returns
    /// the concatenated final text. The default delegates to `generate` and
    /// emits the whole response as a single delta.
    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
        on_delta: DeltaFn,
    ) -> Result<String> {
        let text = self.generate(prompt, system).await?;
        on_delta(&text);
        Ok(text)
    }
}

/// Deterministic marker substituted when a provider exhausts its retries and
/// has no earlier response to fall back on.
#[must_use]
pub fn fallback_text(provider: &str) -> String {
    format!("[{provider} failed to respond]")
}

/// Constructor signature registered per provider kind.
pub type AdapterCtor =
    Arc<dyn Fn(&ProviderConfig, &dyn CredentialResolver) -> Result<Arc<dyn ProviderAdapter>> + Send + Sync>;

/// Maps provider `kind` strings to adapter constructors.
///
/// `default()` registers the in-tree kinds: `openai` (any
/// chat-completions-compatible endpoint) and `mock`.
#[derive(Clone)]
pub struct AdapterRegistry {
    ctors: HashMap<String, AdapterCtor>,
}

impl AdapterRegistry {
    /// Empty registry with no kinds.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Register (or replace) a constructor for a kind.
    pub fn register(&mut self, kind: impl Into<String>, ctor: AdapterCtor) {
        self.ctors.insert(kind.into(), ctor);
    }

    /// Kinds currently registered, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.ctors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build one adapter from its configuration.
    pub fn build(
        &self,
        config: &ProviderConfig,
        resolver: &dyn CredentialResolver,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let ctor = self.ctors.get(&config.kind).ok_or_else(|| {
            QuorumError::Config(format!(
                "unknown provider kind '{}' for provider '{}'",
                config.kind, config.name
            ))
        })?;
        ctor(config, resolver)
    }

    /// Build the full roster, preserving configuration order.
    pub fn build_all(
        &self,
        configs: &[ProviderConfig],
        resolver: &dyn CredentialResolver,
    ) -> Result<Vec<Arc<dyn ProviderAdapter>>> {
        configs.iter().map(|c| self.build(c, resolver)).collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "openai",
            Arc::new(|config, resolver| {
                Ok(Arc::new(ChatCompletionsAdapter::new(config.clone(), resolver)?)
                    as Arc<dyn ProviderAdapter>)
            }),
        );
        registry.register(
            "mock",
            Arc::new(|config, _resolver| {
                Ok(Arc::new(MockAdapter::echo(config.clone())) as Arc<dyn ProviderAdapter>)
            }),
        );
        registry
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthSpec, EnvCredentialResolver};

    fn config(name: &str, kind: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            kind: kind.into(),
            model: "m".into(),
            auth: AuthSpec::None,
            base_url: None,
            timeout_secs: None,
            context_window: None,
            weight: None,
        }
    }

    #[test]
    fn test_registry_rejects_unknown_kind() {
        let registry = AdapterRegistry::default();
        let err = registry
            .build(&config("x", "carrier-pigeon"), &EnvCredentialResolver)
            .unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn test_registry_builds_roster_in_order() {
        let registry = AdapterRegistry::default();
        let adapters = registry
            .build_all(
                &[config("a", "mock"), config("b", "mock")],
                &EnvCredentialResolver,
            )
            .unwrap();
        assert_eq!(adapters[0].name(), "a");
        assert_eq!(adapters[1].name(), "b");
    }

    #[test]
    fn test_fallback_text_is_deterministic() {
        assert_eq!(fallback_text("gpt"), "[gpt failed to respond]");
    }

    #[tokio::test]
    async fn test_default_stream_delegates_to_generate() {
        let adapter = MockAdapter::echo(config("a", "mock"));
        let seen = Arc::new(parking_lot::Mutex::new(String::new()));
        let sink = seen.clone();
        let on_delta: DeltaFn = Arc::new(move |delta| sink.lock().push_str(delta));
        let text = adapter
            .generate_stream("hello", None, on_delta)
            .await
            .unwrap();
        assert_eq!(*seen.lock(), text);
    }
}
