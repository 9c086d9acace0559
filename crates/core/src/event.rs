//! Visitor events and the runtime event bus.
//!
//! `Event` is the closed set of things a visitor session can be told about.
//! `RuntimeEvent` is published when something interesting happens inside the
//! runtime, so observers can react without tight coupling.

use crate::state::BehaviorState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// The kind of a visitor event. Matched exhaustively by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The visitor sent a chat message.
    Message { text: String },
    /// A slash-command or UI command, e.g. `tour`.
    Command {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// The visitor navigated to another page.
    Navigation {
        path: String,
        #[serde(default)]
        title: Option<String>,
    },
    Click { target: String },
    /// Scroll depth, 0.0–1.0.
    Scroll { depth: f32 },
    Hover { target: String },
    Idle { seconds: u64 },
    Focus,
    Blur,
}

impl EventKind {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Command { .. } => "command",
            Self::Navigation { .. } => "navigation",
            Self::Click { .. } => "click",
            Self::Scroll { .. } => "scroll",
            Self::Hover { .. } => "hover",
            Self::Idle { .. } => "idle",
            Self::Focus => "focus",
            Self::Blur => "blur",
        }
    }

    /// High-frequency events that only re-evaluate entry guards and never
    /// reach a handler.
    pub fn is_passive(&self) -> bool {
        match self {
            Self::Scroll { .. } | Self::Hover { .. } | Self::Focus | Self::Blur => true,
            Self::Message { .. }
            | Self::Command { .. }
            | Self::Navigation { .. }
            | Self::Click { .. }
            | Self::Idle { .. } => false,
        }
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    Visitor,
    /// Fired by a previously scheduled `ScheduledEvent`.
    Scheduled,
}

/// A visitor event delivered to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub source: EventSource,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            source: EventSource::Visitor,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::new(EventKind::Message { text: text.into() })
    }

    pub fn command(name: impl Into<String>) -> Self {
        Self::new(EventKind::Command {
            name: name.into(),
            args: Vec::new(),
        })
    }

    pub fn scheduled(kind: EventKind) -> Self {
        Self {
            source: EventSource::Scheduled,
            ..Self::new(kind)
        }
    }
}

/// All runtime events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// The scheduler committed a transition
    StateTransitioned {
        session_id: String,
        from: BehaviorState,
        to: BehaviorState,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A requested transition was not in the adjacency table
    TransitionRejected {
        session_id: String,
        from: BehaviorState,
        to: BehaviorState,
        timestamp: DateTime<Utc>,
    },

    /// A handler failed and the session stayed put
    HandlerFailed {
        session_id: String,
        state: BehaviorState,
        event: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The context store was compacted
    Compacted {
        session_id: String,
        mode: String,
        before: usize,
        after: usize,
        timestamp: DateTime<Utc>,
    },

    /// An enrichment subprocess ran
    EnrichmentFired {
        session_id: String,
        subprocess: String,
        turn: u64,
        timestamp: DateTime<Utc>,
    },

    /// An enrichment subprocess was gated out
    EnrichmentSkipped {
        session_id: String,
        subprocess: String,
        gate: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for runtime events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<RuntimeEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RuntimeEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RuntimeEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
