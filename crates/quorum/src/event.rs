// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Typed deliberation events and the subscriber bus.
//!
//! The engine reports progress through a tagged event type rather than a
//! string-keyed callback. Subscribers implement [`EventSink`] and receive
//! every event in emission order. Event order within a phase is: one
//! [`Event::Phase`], zero or more `Tool`/`Warn`/`Response` events, exactly
//! one [`Event::PhaseDone`].

use crate::voting::VoteResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single observable step of a deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A phase is starting.
    Phase {
        name: String,
        index: usize,
        total: usize,
    },
    /// A phase finished; all participant tasks (including retries) joined.
    PhaseDone { name: String, duration_ms: u64 },
    /// One participant produced a response (or a fallback stood in).
    Response {
        phase: String,
        provider: String,
        chars: usize,
        fallback: bool,
    },
    /// Non-fatal condition: retry, fallback substitution, persistence
    /// failure, unparseable ballot.
    Warn { message: String },
    /// A shell hook ran.
    Tool {
        phase: String,
        command: String,
        success: bool,
    },
    /// Evidence scoring summary for a phase.
    Evidence {
        phase: String,
        mean_score: f64,
        claims: usize,
    },
    /// The adaptive controller made a decision.
    Adaptive {
        phase: String,
        action: String,
        entropy: f64,
        reason: String,
    },
    /// Policy violations were raised (any severity).
    Policy {
        policy: String,
        rule: String,
        action: String,
        message: String,
    },
    /// A human-in-the-loop checkpoint was offered.
    Checkpoint { point: String, action: String },
    /// Ballots were tallied.
    Votes { result: VoteResult },
    /// The deliberation completed.
    Complete {
        session_id: String,
        winner: String,
        duration_ms: u64,
    },
}

impl Event {
    /// Short label used for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Phase { .. } => "phase",
            Event::PhaseDone { .. } => "phase:done",
            Event::Response { .. } => "response",
            Event::Warn { .. } => "warn",
            Event::Tool { .. } => "tool",
            Event::Evidence { .. } => "evidence",
            Event::Adaptive { .. } => "adaptive",
            Event::Policy { .. } => "policy",
            Event::Checkpoint { .. } => "checkpoint",
            Event::Votes { .. } => "votes",
            Event::Complete { .. } => "complete",
        }
    }
}

/// Receives deliberation events in emission order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Fan-out bus over registered sinks.
///
/// Cloning is cheap; clones share the subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers added mid-run see later events only.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Emit an event to every subscriber and to the tracing layer.
    pub fn emit(&self, event: Event) {
        match &event {
            Event::Warn { message } => tracing::warn!(target: "quorum", "{message}"),
            other => tracing::debug!(target: "quorum", kind = other.kind(), "event"),
        }
        for sink in self.sinks.read().iter() {
            sink.emit(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.read().len())
            .finish()
    }
}

/// Sink that records every event; used by tests and the CLI's `--json` mode.
#[derive(Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of events seen so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Count of events matching a kind label.
    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_fans_out_in_order() {
        let bus = EventBus::new();
        let sink = Arc::new(RecordingSink::new());
        bus.subscribe(sink.clone());

        bus.emit(Event::Phase {
            name: "gather".into(),
            index: 0,
            total: 7,
        });
        bus.emit(Event::PhaseDone {
            name: "gather".into(),
            duration_ms: 12,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "phase");
        assert_eq!(events[1].kind(), "phase:done");
    }

    #[test]
    fn test_recording_sink_counts_by_kind() {
        let bus = EventBus::new();
        let sink = Arc::new(RecordingSink::new());
        bus.subscribe(sink.clone());

        bus.emit(Event::Warn {
            message: "retry 1".into(),
        });
        bus.emit(Event::Warn {
            message: "retry 2".into(),
        });
        assert_eq!(sink.count("warn"), 2);
        assert_eq!(sink.count("votes"), 0);
    }
}
