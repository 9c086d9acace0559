//! `concierge replay` — Run one session over a scripted event log.
//!
//! Scheduled events are delivered right after the event that scheduled
//! them, and background enrichment is awaited after every event, so a
//! replay is deterministic.

use super::load_config;
use anyhow::Context;
use async_trait::async_trait;
use concierge_agent::{Dispatch, Runtime};
use concierge_core::actions::{Actions, ScheduledEvent, UiEffect, Utterance};
use concierge_core::event::{Event, RuntimeEvent};
use concierge_core::generation::Generator;
use concierge_core::profile::ProfileStore;
use concierge_core::signals::HydratedSignals;
use concierge_core::testing::ScriptedGenerator;
use concierge_memory::{FileProfileStore, InMemoryProfileStore};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

pub struct ReplayOptions {
    pub events: PathBuf,
    pub signals_file: Option<PathBuf>,
    pub replies: Option<PathBuf>,
    pub visitor: String,
    pub profile_dir: Option<PathBuf>,
}

pub async fn run(config_path: Option<&Path>, options: ReplayOptions) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let events: Vec<Event> = read_json_lines(&options.events)?;
    let signals: Vec<HydratedSignals> = match &options.signals_file {
        Some(path) => read_json_lines(path)?,
        None => Vec::new(),
    };

    let profiles: Arc<dyn ProfileStore> = match &options.profile_dir {
        Some(dir) => Arc::new(FileProfileStore::new(dir)),
        None => Arc::new(InMemoryProfileStore::new()),
    };

    let mut runtime = Runtime::new(config, profiles);
    if let Some(path) = &options.replies {
        runtime = runtime.with_generator(scripted_replies(path)?);
    }
    let mut bus = runtime.bus().subscribe();

    let actions = Arc::new(ConsoleActions::default());
    let mut session = runtime.open_session(&options.visitor, actions.clone()).await;
    println!("▶ Session {} for {}", session.id(), options.visitor);

    let mut pending: Vec<Event> = events.into_iter().rev().collect();
    let mut index = 0;
    while let Some(event) = pending.pop() {
        let signals = signals
            .get(index)
            .or(signals.last())
            .cloned()
            .unwrap_or_default();
        index += 1;

        match &event.kind {
            concierge_core::event::EventKind::Message { text } => println!("🧑 {text}"),
            other => println!("· {}", other.name()),
        }

        match session.handle(&event, &signals).await {
            Ok(Dispatch::Transitioned { from, to }) => println!("↪ {from} → {to}"),
            Ok(Dispatch::Stayed | Dispatch::Updated) => {}
            Err(e) => println!("❌ {e}"),
        }
        session.settle().await;

        loop {
            match bus.try_recv() {
                Ok(event) => print_runtime_event(&event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        for (scheduled, delay) in actions.take_scheduled() {
            println!("⏰ {} after {}s", scheduled.kind.name(), delay.as_secs());
            pending.push(Event::scheduled(scheduled.kind));
        }
    }

    let state = session.state();
    let turns = session.turns();
    let transitions = session.scheduler().transitions().len();
    let entries = session.store().len();
    let summary = session.close().await;

    println!();
    println!("■ Final state: {state}");
    println!("  Turns:       {turns}");
    println!("  Transitions: {transitions}");
    println!("  Entries:     {entries}");
    if let Some(summary) = summary {
        if !summary.topics.is_empty() {
            println!("  Topics:      {}", summary.topics.join(", "));
        }
    }

    Ok(())
}

fn print_runtime_event(event: &RuntimeEvent) {
    match event {
        RuntimeEvent::TransitionRejected { from, to, .. } => {
            println!("⛔ rejected {from} → {to}");
        }
        RuntimeEvent::HandlerFailed {
            state,
            error_message,
            ..
        } => println!("⚠️  handler for {state} failed: {error_message}"),
        RuntimeEvent::Compacted {
            mode, before, after, ..
        } => println!("🗜  compacted ({mode}) {before} → {after}"),
        RuntimeEvent::EnrichmentFired {
            subprocess, turn, ..
        } => println!("✨ {subprocess} fired on turn {turn}"),
        RuntimeEvent::StateTransitioned { .. } | RuntimeEvent::EnrichmentSkipped { .. } => {}
    }
}

/// Parse one JSON value per non-empty line; `#` starts a comment line.
fn read_json_lines<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_json_lines(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_json_lines<T: DeserializeOwned>(content: &str) -> anyhow::Result<Vec<T>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(number, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", number + 1))
        })
        .collect()
}

fn scripted_replies(path: &Path) -> anyhow::Result<Arc<dyn Generator>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let replies: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    Ok(Arc::new(ScriptedGenerator::new(replies)))
}

/// Prints what the agent does and queues scheduled events for replay.
#[derive(Default)]
struct ConsoleActions {
    scheduled: Mutex<Vec<(ScheduledEvent, Duration)>>,
}

impl ConsoleActions {
    fn take_scheduled(&self) -> Vec<(ScheduledEvent, Duration)> {
        match self.scheduled.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl Actions for ConsoleActions {
    async fn speak(&self, utterance: Utterance) {
        match utterance {
            Utterance::Text(text) => println!("🤖 {text}"),
            Utterance::Stream(mut rx) => {
                print!("🤖 ");
                while let Some(fragment) = rx.recv().await {
                    print!("{fragment}");
                    let _ = std::io::stdout().flush();
                }
                println!();
            }
        }
    }

    fn log(&self, message: &str, data: Option<serde_json::Value>) {
        match data {
            Some(data) => tracing::info!(%data, "{message}"),
            None => tracing::info!("{message}"),
        }
    }

    fn dispatch_ui_effect(&self, effect: UiEffect) {
        println!("🎛  {} {}", effect.name, effect.payload);
    }

    fn schedule_event(&self, event: ScheduledEvent, delay: Duration) {
        let mut queue = match self.scheduled.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(key) = &event.key {
            queue.retain(|(pending, _)| pending.key.as_ref() != Some(key));
        }
        queue.push((event, delay));
    }
}
