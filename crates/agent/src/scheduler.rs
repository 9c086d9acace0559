//! The behavioral scheduler.
//!
//! Owns the session's current state, its context store and the transition
//! audit trail. Each event goes to the current state's handler (or, for
//! passive events, straight to guard evaluation). Requested transitions are
//! checked against the graph before they are committed, and the compaction
//! engine runs after every committed outcome.

use crate::graph::TransitionGraph;
use crate::handler::{HandlerContext, HandlerOutcome, StateHandler};
use crate::handlers::default_handlers;
use crate::respond::Responder;
use chrono::{DateTime, Utc};
use concierge_core::actions::Actions;
use concierge_core::error::{HandlerError, TransitionError};
use concierge_core::event::{Event, EventBus, RuntimeEvent};
use concierge_core::message::{EntryKind, MemoryEntry};
use concierge_core::signals::HydratedSignals;
use concierge_core::state::BehaviorState;
use concierge_memory::{CompactionConfig, CompactionEngine, ContextStore};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: BehaviorState,
    pub to: BehaviorState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// What one dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing committed.
    Stayed,
    /// The store advanced; the state did not change.
    Updated,
    Transitioned {
        from: BehaviorState,
        to: BehaviorState,
    },
}

pub struct Scheduler {
    session_id: String,
    state: BehaviorState,
    params: serde_json::Value,
    store: ContextStore,
    graph: Arc<TransitionGraph>,
    handlers: HashMap<BehaviorState, Arc<dyn StateHandler>>,
    responder: Arc<Responder>,
    actions: Arc<dyn Actions>,
    compaction: CompactionEngine,
    bus: Option<Arc<EventBus>>,
    strict: bool,
    transitions: Vec<TransitionRecord>,
}

impl Scheduler {
    /// A scheduler in `greeting` with the built-in graph and default handlers.
    pub fn new(
        session_id: impl Into<String>,
        store: ContextStore,
        responder: Arc<Responder>,
        actions: Arc<dyn Actions>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state: BehaviorState::Greeting,
            params: serde_json::Value::Null,
            store,
            graph: Arc::new(TransitionGraph::builtin()),
            handlers: default_handlers(Duration::from_secs(45)),
            responder,
            actions,
            compaction: CompactionEngine::new(CompactionConfig::default()),
            bus: None,
            strict: false,
            transitions: Vec::new(),
        }
    }

    pub fn with_graph(mut self, graph: Arc<TransitionGraph>) -> Self {
        self.graph = graph;
        self
    }

    /// Register the handler for one state.
    pub fn with_handler(mut self, state: BehaviorState, handler: Arc<dyn StateHandler>) -> Self {
        self.handlers.insert(state, handler);
        self
    }

    pub fn with_handlers(mut self, handlers: HashMap<BehaviorState, Arc<dyn StateHandler>>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = CompactionEngine::new(config);
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Fail loudly on illegal transitions instead of staying.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Start in `state` instead of `greeting`.
    pub fn starting_in(mut self, state: BehaviorState) -> Self {
        self.state = state;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> BehaviorState {
        self.state
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Entry params of the current state.
    pub fn params(&self) -> &serde_json::Value {
        &self.params
    }

    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    /// The transition audit trail, oldest first.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Deliver one event.
    ///
    /// Handler failures and illegal transitions leave state and store
    /// untouched. The only error is an illegal transition in strict mode.
    pub async fn dispatch(
        &mut self,
        event: &Event,
        signals: &HydratedSignals,
        cancel: &CancellationToken,
    ) -> Result<Dispatch, TransitionError> {
        let signals = signals.clone().normalized();

        if event.kind.is_passive() {
            return Ok(self.auto_transition(&signals, event.kind.name()));
        }

        let Some(handler) = self.handlers.get(&self.state).cloned() else {
            self.handler_failed(HandlerError::Missing(self.state), event);
            return Ok(Dispatch::Stayed);
        };

        let ctx = HandlerContext {
            state: self.state,
            store: &self.store,
            event,
            signals: &signals,
            params: &self.params,
            actions: &*self.actions,
            responder: &self.responder,
            graph: &self.graph,
            cancel,
        };

        let outcome = match AssertUnwindSafe(handler.handle(ctx)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                self.handler_failed(error, event);
                return Ok(Dispatch::Stayed);
            }
            Err(panic) => {
                let error = HandlerError::Panicked {
                    state: self.state,
                    event: event.kind.name().to_string(),
                    message: panic_message(&*panic),
                };
                self.handler_failed(error, event);
                return Ok(Dispatch::Stayed);
            }
        };

        let HandlerOutcome::Advance {
            store,
            next,
            params,
        } = outcome
        else {
            return Ok(Dispatch::Stayed);
        };

        let from = self.state;
        match next.filter(|to| *to != from) {
            Some(to) => {
                let reason = format!("handler ({})", event.kind.name());
                if let Err(error) = self.graph.check(from, to, &reason) {
                    self.reject(&error);
                    return if self.strict { Err(error) } else { Ok(Dispatch::Stayed) };
                }
                self.commit_store(store);
                self.commit_transition(to, reason, params);
                Ok(Dispatch::Transitioned { from, to })
            }
            None => {
                self.commit_store(store);
                Ok(Dispatch::Updated)
            }
        }
    }

    /// Apply an explicit transition. Only the adjacency table is consulted;
    /// entry guards gate automatic transitions only.
    pub fn apply_transition(
        &mut self,
        from: BehaviorState,
        to: BehaviorState,
        reason: &str,
    ) -> Result<(), TransitionError> {
        if from != self.state {
            let error = TransitionError {
                from,
                to,
                reason: format!("session is in {}", self.state),
            };
            self.reject(&error);
            return Err(error);
        }
        if let Err(error) = self.graph.check(from, to, reason) {
            self.reject(&error);
            return Err(error);
        }
        self.commit_transition(to, reason.to_string(), serde_json::Value::Null);
        Ok(())
    }

    /// Replace a region with enrichment output. The next handler sees it.
    pub fn attach_region(&mut self, region: &str, text: &str) {
        let entries = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                MemoryEntry::system(text)
                    .with_kind(EntryKind::Enrichment)
                    .internal(),
            ]
        };
        self.store = self.store.set_region_entries(region, entries, None);
    }

    fn auto_transition(&mut self, signals: &HydratedSignals, event: &str) -> Dispatch {
        let from = self.state;
        let Some(to) = self.graph.find_best_transition(from, signals) else {
            debug!(session_id = %self.session_id, state = %from, event, "No entry guard passed");
            return Dispatch::Stayed;
        };
        let reason = match self.graph.guard(to) {
            Some(guard) => format!("guard: {}", guard.description),
            None => format!("guard ({event})"),
        };
        self.commit_transition(to, reason, serde_json::Value::Null);
        Dispatch::Transitioned { from, to }
    }

    fn commit_store(&mut self, store: ContextStore) {
        self.store = store;
        let Some(outcome) = self.compaction.maybe_compact(&self.store) else {
            return;
        };
        let report = outcome.report;
        debug!(
            session_id = %self.session_id,
            mode = report.mode.as_str(),
            topics = report.topics.len(),
            "Committed compacted store"
        );
        self.publish(RuntimeEvent::Compacted {
            session_id: self.session_id.clone(),
            mode: report.mode.as_str().to_string(),
            before: report.before,
            after: report.after,
            timestamp: Utc::now(),
        });
        self.store = outcome.store;
    }

    fn commit_transition(&mut self, to: BehaviorState, reason: String, params: serde_json::Value) {
        let from = self.state;
        let timestamp = Utc::now();
        info!(session_id = %self.session_id, %from, %to, reason = %reason, "State transition");

        self.publish(RuntimeEvent::StateTransitioned {
            session_id: self.session_id.clone(),
            from,
            to,
            reason: reason.clone(),
            timestamp,
        });
        self.transitions.push(TransitionRecord {
            from,
            to,
            reason,
            timestamp,
        });
        self.state = to;
        self.params = params;

        if let Some(handler) = self.handlers.get(&to) {
            handler.on_enter(to, &self.params, &*self.actions);
        }
    }

    fn reject(&self, error: &TransitionError) {
        warn!(
            session_id = %self.session_id,
            from = %error.from,
            to = %error.to,
            reason = %error.reason,
            "Rejected illegal transition"
        );
        self.publish(RuntimeEvent::TransitionRejected {
            session_id: self.session_id.clone(),
            from: error.from,
            to: error.to,
            timestamp: Utc::now(),
        });
    }

    fn handler_failed(&self, error: HandlerError, event: &Event) {
        warn!(
            session_id = %self.session_id,
            state = %self.state,
            event = event.kind.name(),
            error = %error,
            "Handler failed, staying in state"
        );
        self.publish(RuntimeEvent::HandlerFailed {
            session_id: self.session_id.clone(),
            state: self.state,
            event: event.kind.name().to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: RuntimeEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
