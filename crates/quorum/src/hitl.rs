// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Human-in-the-loop checkpoints.
//!
//! The engine pauses at configured points and hands a state snapshot to an
//! external handler, which decides whether to continue, inject guidance,
//! override the vote winner, or abort the run. The handler is supplied from
//! outside the crate (CLI prompt, web UI, test stub); without one, every
//! checkpoint continues.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where in the run a checkpoint was raised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "point", rename_all = "kebab-case")]
pub enum CheckpointPoint {
    /// A `pause` policy fired before dispatch.
    PolicyPause { policy: String, rule: String },
    /// A configured post-phase stop.
    AfterPhase { phase: String },
    /// After the vote tally.
    AfterVote,
    /// The vote margin fell below the profile's controversy threshold.
    OnControversy { margin: f64 },
}

impl CheckpointPoint {
    /// Short label for events and logs.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            CheckpointPoint::PolicyPause { policy, .. } => format!("policy-pause:{policy}"),
            CheckpointPoint::AfterPhase { phase } => format!("after-phase:{phase}"),
            CheckpointPoint::AfterVote => "after-vote".to_string(),
            CheckpointPoint::OnControversy { .. } => "on-controversy".to_string(),
        }
    }
}

/// The snapshot handed to the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub point: CheckpointPoint,
    pub session_id: String,
    /// Human-readable summary of the state at this point.
    pub summary: String,
    /// Structured state (latest phase output, vote result, ...).
    #[serde(default)]
    pub state: serde_json::Value,
}

/// The handler's decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum HitlAction {
    Continue,
    /// Append guidance to every later phase prompt.
    Inject { input: String },
    /// Replace the tallied winner. Valid only at vote checkpoints.
    OverrideWinner { winner: String },
    Abort,
}

impl HitlAction {
    /// Label used in checkpoint events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            HitlAction::Continue => "continue",
            HitlAction::Inject { .. } => "inject",
            HitlAction::OverrideWinner { .. } => "override-winner",
            HitlAction::Abort => "abort",
        }
    }
}

/// External checkpoint handler.
#[async_trait]
pub trait HitlHandler: Send + Sync {
    async fn on_checkpoint(&self, checkpoint: &Checkpoint) -> HitlAction;
}

/// Test/CI handler that replays a fixed action sequence, then continues.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    actions: parking_lot::Mutex<Vec<HitlAction>>,
}

impl ScriptedHandler {
    #[must_use]
    pub fn new(actions: Vec<HitlAction>) -> Self {
        Self {
            actions: parking_lot::Mutex::new(actions),
        }
    }
}

#[async_trait]
impl HitlHandler for ScriptedHandler {
    async fn on_checkpoint(&self, _checkpoint: &Checkpoint) -> HitlAction {
        let mut actions = self.actions.lock();
        if actions.is_empty() {
            HitlAction::Continue
        } else {
            actions.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_handler_replays_then_continues() {
        let handler = ScriptedHandler::new(vec![
            HitlAction::Inject {
                input: "consider cost".into(),
            },
            HitlAction::Abort,
        ]);
        let checkpoint = Checkpoint {
            point: CheckpointPoint::AfterVote,
            session_id: "s".into(),
            summary: "vote done".into(),
            state: serde_json::Value::Null,
        };
        assert_eq!(
            handler.on_checkpoint(&checkpoint).await.label(),
            "inject"
        );
        assert_eq!(handler.on_checkpoint(&checkpoint).await, HitlAction::Abort);
        assert_eq!(
            handler.on_checkpoint(&checkpoint).await,
            HitlAction::Continue
        );
    }

    #[test]
    fn test_point_labels() {
        assert_eq!(
            CheckpointPoint::AfterPhase {
                phase: "DEBATE".into()
            }
            .label(),
            "after-phase:DEBATE"
        );
        assert_eq!(
            CheckpointPoint::OnControversy { margin: 0.1 }.label(),
            "on-controversy"
        );
    }
}
