//! Scripted stand-ins for the external capabilities.
//!
//! Used by unit tests across the workspace and by the CLI's `replay`
//! command, which has no real model behind it.

use crate::actions::{Actions, ScheduledEvent, UiEffect, Utterance};
use crate::error::CapabilityError;
use crate::generation::{Generation, GenerationRequest, Generator};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted generator response.
#[derive(Debug, Clone)]
pub enum Script {
    Text(String),
    /// Fragments sent `gap` apart
    Stream { fragments: Vec<String>, gap: Duration },
    Fail(CapabilityError),
    /// Reply only after `delay`
    Delayed { delay: Duration, text: String },
}

/// A generator that replays a queue of scripted responses.
///
/// Once the queue is empty every call fails with `Rejected`.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
    configured: bool,
}

impl ScriptedGenerator {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::from_script(replies.into_iter().map(|r| Script::Text(r.into())))
    }

    pub fn from_script(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            configured: true,
        }
    }

    /// A generator that reports itself as not configured.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::from_script([])
        }
    }

    pub fn push(&self, script: Script) {
        lock(&self.script).push_back(script);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, CapabilityError> {
        lock(&self.requests).push(request);
        let next = lock(&self.script).pop_front();
        match next {
            None => Err(CapabilityError::Rejected("script exhausted".into())),
            Some(Script::Text(text)) => Ok(Generation::Text(text)),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Delayed { delay, text }) => {
                tokio::time::sleep(delay).await;
                Ok(Generation::Text(text))
            }
            Some(Script::Stream { fragments, gap }) => {
                let (tx, rx) = mpsc::channel(fragments.len().max(1));
                tokio::spawn(async move {
                    for fragment in fragments {
                        if !gap.is_zero() {
                            tokio::time::sleep(gap).await;
                        }
                        if tx.send(Ok(fragment)).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(Generation::Stream(rx))
            }
        }
    }
}

/// Actions that record everything they are asked to do.
#[derive(Default)]
pub struct RecordingActions {
    spoken: Mutex<Vec<String>>,
    logs: Mutex<Vec<String>>,
    effects: Mutex<Vec<UiEffect>>,
    scheduled: Mutex<Vec<(ScheduledEvent, Duration)>>,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }

    pub fn logs(&self) -> Vec<String> {
        lock(&self.logs).clone()
    }

    pub fn effects(&self) -> Vec<UiEffect> {
        lock(&self.effects).clone()
    }

    pub fn scheduled(&self) -> Vec<(ScheduledEvent, Duration)> {
        lock(&self.scheduled).clone()
    }
}

#[async_trait]
impl Actions for RecordingActions {
    async fn speak(&self, utterance: Utterance) {
        let text = match utterance {
            Utterance::Text(text) => text,
            Utterance::Stream(mut rx) => {
                let mut out = String::new();
                while let Some(fragment) = rx.recv().await {
                    out.push_str(&fragment);
                }
                out
            }
        };
        lock(&self.spoken).push(text);
    }

    fn log(&self, message: &str, _data: Option<serde_json::Value>) {
        lock(&self.logs).push(message.to_string());
    }

    fn dispatch_ui_effect(&self, effect: UiEffect) {
        lock(&self.effects).push(effect);
    }

    fn schedule_event(&self, event: ScheduledEvent, delay: Duration) {
        lock(&self.scheduled).push((event, delay));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationMessage, GenerationOptions};
    use crate::message::Role;

    fn request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![GenerationMessage::new(Role::User, "hi")],
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn replays_in_order_then_fails() {
        let generator = ScriptedGenerator::new(["one", "two"]);
        assert_eq!(generator.generate(request()).await.unwrap().collect().await.unwrap(), "one");
        assert_eq!(generator.generate(request()).await.unwrap().collect().await.unwrap(), "two");
        assert!(generator.generate(request()).await.is_err());
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn streams_fragments() {
        let generator = ScriptedGenerator::from_script([Script::Stream {
            fragments: vec!["Hel".into(), "lo".into()],
            gap: Duration::ZERO,
        }]);
        let text = generator.generate(request()).await.unwrap().collect().await.unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn recording_actions_drain_streams() {
        let actions = RecordingActions::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send("a".to_string()).await.unwrap();
        tx.send("b".to_string()).await.unwrap();
        drop(tx);
        actions.speak(Utterance::Stream(rx)).await;
        actions.speak(Utterance::Text("c".into())).await;
        assert_eq!(actions.spoken(), vec!["ab", "c"]);
    }
}
