// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for the deliberation runtime.

use thiserror::Error;

/// Quorum result type.
pub type Result<T> = std::result::Result<T, QuorumError>;

/// Errors that can occur while configuring or running a deliberation.
///
/// Propagation policy:
/// - `Provider` and `Timeout` are recovered inside a phase via retry and
///   fallback text and never escape the engine.
/// - `Persist` is downgraded to a warning event; the in-memory result is
///   authoritative.
/// - `PolicyBlocked`, `Config`, `Validation`, and `Aborted` terminate a run.
/// - `Integrity` is reported by verification tools only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuorumError {
    /// Missing provider, unknown profile, or malformed configuration file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A CLI flag, profile field, or policy file failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A policy rule with the `block` action fired.
    #[error("Policy '{policy}' blocked the deliberation: {message}")]
    PolicyBlocked { policy: String, message: String },

    /// Transient or permanent upstream provider failure.
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// A provider call exceeded its configured deadline.
    #[error("Provider '{provider}' timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    /// Session, ledger, or memory I/O failure.
    #[error("Persistence error: {0}")]
    Persist(String),

    /// A vote, policy, or attestation document could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A hash chain failed verification.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The human-in-the-loop handler aborted the run.
    #[error("Deliberation aborted: {0}")]
    Aborted(String),

    /// Underlying I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuorumError {
    /// Shorthand for a provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// True when the error should terminate a run rather than degrade it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Validation(_)
                | Self::PolicyBlocked { .. }
                | Self::Aborted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(QuorumError::Config("x".into()).is_fatal());
        assert!(QuorumError::Aborted("user".into()).is_fatal());
        assert!(!QuorumError::provider("gpt", "503").is_fatal());
        assert!(!QuorumError::Persist("disk".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_provider_name() {
        let err = QuorumError::Timeout {
            provider: "claude".into(),
            seconds: 30,
        };
        assert!(err.to_string().contains("claude"));
        assert!(err.to_string().contains("30"));
    }
}
