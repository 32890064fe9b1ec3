// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Pre/post-phase shell hooks.
//!
//! Profiles may attach commands under `pre-<phase>` / `post-<phase>` keys.
//! Hooks receive the run context through environment variables; post hooks
//! additionally get `DELIB_PHASE_OUTPUT` pointing to a temporary file with
//! the phase's JSON output. Hook failures are reported as events and never
//! fail the run.

use crate::error::{QuorumError, Result};
use crate::phases::PhaseOutput;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

pub const ENV_PHASE: &str = "DELIB_PHASE";
pub const ENV_SESSION: &str = "DELIB_SESSION";
pub const ENV_PROVIDERS: &str = "DELIB_PROVIDERS";
pub const ENV_INPUT: &str = "DELIB_INPUT";
pub const ENV_PHASE_OUTPUT: &str = "DELIB_PHASE_OUTPUT";

/// Hook invocation context, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub session_id: String,
    pub input: String,
    pub providers: Vec<String>,
}

/// Runs configured shell hooks around phases.
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    hooks: HashMap<String, String>,
}

impl HookRunner {
    #[must_use]
    pub fn new(hooks: HashMap<String, String>) -> Self {
        Self { hooks }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the `pre-<phase>` hook, if configured. Returns the command line
    /// that ran, for event reporting.
    pub async fn run_pre(&self, phase: &str, ctx: &HookContext) -> Option<(String, Result<()>)> {
        let key = format!("pre-{}", phase.to_lowercase());
        let command = self.hooks.get(&key)?.clone();
        let result = self.spawn(&command, phase, ctx, None).await;
        Some((command, result))
    }

    /// Run the `post-<phase>` hook, if configured, exposing the phase output
    /// through a temporary JSON file.
    pub async fn run_post(
        &self,
        phase: &str,
        ctx: &HookContext,
        output: &PhaseOutput,
    ) -> Option<(String, Result<()>)> {
        let key = format!("post-{}", phase.to_lowercase());
        let command = self.hooks.get(&key)?.clone();

        let json = match serde_json::to_vec_pretty(output) {
            Ok(json) => json,
            Err(e) => return Some((command, Err(QuorumError::Persist(e.to_string())))),
        };
        let file = match tempfile::NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => return Some((command, Err(QuorumError::Io(e)))),
        };
        if let Err(e) = std::fs::write(file.path(), &json) {
            return Some((command, Err(QuorumError::Io(e))));
        }
        let path = file.path().to_string_lossy().to_string();
        let result = self.spawn(&command, phase, ctx, Some(&path)).await;
        // `file` drops (and unlinks) only after the hook exits.
        drop(file);
        Some((command, result))
    }

    async fn spawn(
        &self,
        command: &str,
        phase: &str,
        ctx: &HookContext,
        output_path: Option<&str>,
    ) -> Result<()> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env(ENV_PHASE, phase)
            .env(ENV_SESSION, &ctx.session_id)
            .env(ENV_PROVIDERS, ctx.providers.join(","))
            .env(ENV_INPUT, &ctx.input)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(path) = output_path {
            cmd.env(ENV_PHASE_OUTPUT, path);
        }
        let status = cmd
            .status()
            .await
            .map_err(|e| QuorumError::Persist(format!("hook spawn failed: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(QuorumError::Persist(format!(
                "hook exited with {}",
                status.code().map_or("signal".to_string(), |c| c.to_string())
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::{names, PhaseResponse};
    use chrono::Utc;

    fn ctx() -> HookContext {
        HookContext {
            session_id: "s1".into(),
            input: "the question".into(),
            providers: vec!["a".into(), "b".into()],
        }
    }

    fn output() -> PhaseOutput {
        PhaseOutput {
            phase: names::GATHER.into(),
            timestamp: Utc::now(),
            duration_ms: 1,
            inputs: vec![],
            responses: vec![PhaseResponse {
                provider: "a".into(),
                text: "r".into(),
                fallback: false,
            }],
        }
    }

    #[tokio::test]
    async fn test_missing_hook_is_none() {
        let runner = HookRunner::default();
        assert!(runner.run_pre(names::GATHER, &ctx()).await.is_none());
    }

    #[tokio::test]
    async fn test_pre_hook_sees_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("seen");
        let mut hooks = HashMap::new();
        hooks.insert(
            "pre-gather".to_string(),
            format!("echo \"$DELIB_PHASE:$DELIB_PROVIDERS\" > {}", marker.display()),
        );
        let runner = HookRunner::new(hooks);
        let (_, result) = runner.run_pre(names::GATHER, &ctx()).await.unwrap();
        result.unwrap();
        let seen = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(seen.trim(), "GATHER:a,b");
    }

    #[tokio::test]
    async fn test_post_hook_reads_phase_output_file() {
        let tmp = tempfile::tempdir().unwrap();
        let copy = tmp.path().join("copy.json");
        let mut hooks = HashMap::new();
        hooks.insert(
            "post-gather".to_string(),
            format!("cp \"$DELIB_PHASE_OUTPUT\" {}", copy.display()),
        );
        let runner = HookRunner::new(hooks);
        let (_, result) = runner.run_post(names::GATHER, &ctx(), &output()).await.unwrap();
        result.unwrap();
        let copied: PhaseOutput =
            serde_json::from_str(&std::fs::read_to_string(&copy).unwrap()).unwrap();
        assert_eq!(copied.responses[0].provider, "a");
    }

    #[tokio::test]
    async fn test_failing_hook_reports_error_not_panic() {
        let mut hooks = HashMap::new();
        hooks.insert("pre-gather".to_string(), "exit 3".to_string());
        let runner = HookRunner::new(hooks);
        let (_, result) = runner.run_pre(names::GATHER, &ctx()).await.unwrap();
        assert!(result.is_err());
    }
}
