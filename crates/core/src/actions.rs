//! Actions capability — the only way the runtime reaches the UI.
//!
//! Handlers speak, log, dispatch UI effects, and schedule future events
//! through this trait; they never touch the page directly.

use crate::event::EventKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Something for the agent to say.
#[derive(Debug)]
pub enum Utterance {
    Text(String),
    /// Fragments delivered as they are produced; channel close ends it.
    Stream(mpsc::Receiver<String>),
}

/// A UI side effect descriptor (open a panel, highlight an element, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiEffect {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl UiEffect {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// An event to deliver back to the session later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub kind: EventKind,
    /// Scheduling with the same key replaces a pending one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[async_trait]
pub trait Actions: Send + Sync {
    /// Deliver an utterance to the visitor.
    async fn speak(&self, utterance: Utterance);

    /// Structured log line for the host.
    fn log(&self, message: &str, data: Option<serde_json::Value>);

    fn dispatch_ui_effect(&self, effect: UiEffect);

    fn schedule_event(&self, event: ScheduledEvent, delay: Duration);
}
