// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Chat-completions adapter for OpenAI-compatible endpoints.
//!
//! Covers any upstream speaking the `/chat/completions` dialect (OpenAI
//! itself, Azure-style gateways, local inference servers). Other wire
//! dialects live outside this crate and register their own adapter kinds.

use super::{DeltaFn, ProviderAdapter};
use crate::config::{CredentialResolver, ProviderConfig};
use crate::error::{QuorumError, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Adapter over an OpenAI-compatible chat-completions endpoint.
#[derive(Debug)]
pub struct ChatCompletionsAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl ChatCompletionsAdapter {
    /// Build the adapter, resolving the credential once up front.
    pub fn new(config: ProviderConfig, resolver: &dyn CredentialResolver) -> Result<Self> {
        let api_key = resolver.resolve(&config.auth)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()
            .map_err(|e| QuorumError::Config(format!("http client for '{}': {e}", config.name)))?;
        Ok(Self {
            config,
            client,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn messages<'a>(prompt: &'a str, system: Option<&'a str>) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        messages
    }

    fn request(&self, prompt: &str, system: Option<&str>, stream: bool) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.endpoint()).json(&ChatRequest {
            model: &self.config.model,
            messages: Self::messages(prompt, system),
            stream,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(300).collect();
        Err(QuorumError::provider(
            &self.config.name,
            format!("HTTP {status}: {snippet}"),
        ))
    }
}

#[async_trait]
impl ProviderAdapter for ChatCompletionsAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let response = self
            .request(prompt, system, false)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuorumError::Timeout {
                        provider: self.config.name.clone(),
                        seconds: self.config.timeout_secs(),
                    }
                } else {
                    QuorumError::provider(&self.config.name, e.to_string())
                }
            })?;
        let response = self.check_status(response).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| QuorumError::provider(&self.config.name, format!("bad response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(QuorumError::provider(
                &self.config.name,
                "empty completion",
            ));
        }
        Ok(text)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
        on_delta: DeltaFn,
    ) -> Result<String> {
        let response = self
            .request(prompt, system, true)
            .send()
            .await
            .map_err(|e| QuorumError::provider(&self.config.name, e.to_string()))?;
        let response = self.check_status(response).await?;

        let mut stream = response.bytes_stream().eventsource();
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            let event =
                event.map_err(|e| QuorumError::provider(&self.config.name, e.to_string()))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: StreamChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                // Comment and keep-alive frames are not chunks.
                Err(_) => continue,
            };
            for choice in chunk.choices {
                if let Some(delta) = choice.delta.content {
                    on_delta(&delta);
                    text.push_str(&delta);
                }
            }
        }
        if text.trim().is_empty() {
            return Err(QuorumError::provider(
                &self.config.name,
                "empty streamed completion",
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthSpec, EnvCredentialResolver};

    fn config(base_url: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: "gpt".into(),
            kind: "openai".into(),
            model: "gpt-4o".into(),
            auth: AuthSpec::Token {
                token: "sk-test".into(),
            },
            base_url: base_url.map(str::to_string),
            timeout_secs: Some(5),
            context_window: None,
            weight: None,
        }
    }

    #[test]
    fn test_endpoint_default_and_override() {
        let adapter = ChatCompletionsAdapter::new(config(None), &EnvCredentialResolver).unwrap();
        assert_eq!(
            adapter.endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );

        let adapter =
            ChatCompletionsAdapter::new(config(Some("http://localhost:8000/v1/")), &EnvCredentialResolver)
                .unwrap();
        assert_eq!(adapter.endpoint(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_system_message_ordering() {
        let messages = ChatCompletionsAdapter::messages("question", Some("be terse"));
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        let messages = ChatCompletionsAdapter::messages("question", None);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"hel"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hel"));
        let done: std::result::Result<StreamChunk, _> = serde_json::from_str("[DONE]");
        assert!(done.is_err());
    }
}
