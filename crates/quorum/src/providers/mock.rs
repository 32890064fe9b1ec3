// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Scripted adapter for tests and offline runs.

use super::ProviderAdapter;
use crate::config::ProviderConfig;
use crate::error::{QuorumError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Behavior of one scripted call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this text.
    Text(String),
    /// Return an empty string (the engine treats this as a failure).
    Empty,
    /// Return a provider error.
    Error(String),
}

/// Adapter that replays a script of responses.
///
/// When the script is exhausted the adapter echoes a deterministic summary of
/// the prompt, so multi-phase engine tests do not need a reply per phase.
/// Call counts are tracked for retry-exhaustion assertions.
#[derive(Debug)]
pub struct MockAdapter {
    config: ProviderConfig,
    script: Mutex<Vec<MockReply>>,
    calls: AtomicUsize,
}

impl MockAdapter {
    /// Adapter with a fixed reply script, consumed front-to-back.
    #[must_use]
    pub fn scripted(config: ProviderConfig, script: Vec<MockReply>) -> Self {
        Self {
            config,
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Adapter that always echoes; used by the default registry.
    #[must_use]
    pub fn echo(config: ProviderConfig) -> Self {
        Self::scripted(config, Vec::new())
    }

    /// Total calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn echo_reply(&self, prompt: &str) -> String {
        let head: String = prompt.chars().take(80).collect();
        format!("{} considered: {}", self.config.name, head)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        match next {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Empty) => Ok(String::new()),
            Some(MockReply::Error(message)) => {
                Err(QuorumError::provider(&self.config.name, message))
            }
            None => Ok(self.echo_reply(prompt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthSpec;

    fn config(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            kind: "mock".into(),
            model: "echo".into(),
            auth: AuthSpec::None,
            base_url: None,
            timeout_secs: None,
            context_window: None,
            weight: None,
        }
    }

    #[tokio::test]
    async fn test_script_replays_then_echoes() {
        let adapter = MockAdapter::scripted(
            config("a"),
            vec![
                MockReply::Text("first".into()),
                MockReply::Error("boom".into()),
            ],
        );
        assert_eq!(adapter.generate("p", None).await.unwrap(), "first");
        assert!(adapter.generate("p", None).await.is_err());
        let echoed = adapter.generate("prompt text", None).await.unwrap();
        assert!(echoed.contains("prompt text"));
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_reply_is_empty_string() {
        let adapter = MockAdapter::scripted(config("a"), vec![MockReply::Empty]);
        assert_eq!(adapter.generate("p", None).await.unwrap(), "");
    }
}
