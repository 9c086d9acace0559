//! Transition graph — which behavioral states may follow which.
//!
//! A static adjacency table plus optional entry guards over live signals.
//! Explicit transitions only need an edge; automatic transitions also need
//! the target's guard to pass.

use concierge_core::error::TransitionError;
use concierge_core::signals::HydratedSignals;
use concierge_core::state::BehaviorState;
use std::collections::HashMap;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&HydratedSignals) -> bool + Send + Sync>;

/// An entry-guard predicate with a human-readable description.
#[derive(Clone)]
pub struct EntryGuard {
    pub description: String,
    predicate: Predicate,
}

impl EntryGuard {
    pub fn new(
        description: impl Into<String>,
        predicate: impl Fn(&HydratedSignals) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn allows(&self, signals: &HydratedSignals) -> bool {
        (self.predicate)(signals)
    }
}

impl std::fmt::Debug for EntryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryGuard")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransitionGraph {
    adjacency: HashMap<BehaviorState, Vec<BehaviorState>>,
    guards: HashMap<BehaviorState, EntryGuard>,
}

impl TransitionGraph {
    /// A graph with no edges and no guards.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default behavioral graph.
    pub fn builtin() -> Self {
        use BehaviorState::*;

        Self::empty()
            .with_edges(Greeting, &[Curious, Returning])
            .with_edges(Returning, &[Engaged, Curious, Dormant])
            .with_edges(Curious, &[Engaged, Tour, Dormant, Exiting])
            .with_edges(Engaged, &[Ready, Tour, Curious, Dormant, Exiting])
            .with_edges(Ready, &[Engaged, Dormant, Exiting])
            .with_edges(Tour, &[Engaged, Curious, Exiting])
            .with_edges(Dormant, &[Returning, Engaged, Curious, Exiting])
            .with_edges(Exiting, &[Engaged, Dormant])
            .with_guard(Returning, EntryGuard::new("returning visitor", |s| s.is_returning))
            .with_guard(
                Curious,
                EntryGuard::new("20s on page, 30% scrolled, or 2+ pages", |s| {
                    s.time_on_page_secs >= 20 || s.scroll_depth >= 0.3 || s.pages_viewed >= 2
                }),
            )
            .with_guard(Engaged, EntryGuard::new("1+ messages sent", |s| s.messages_sent >= 1))
            .with_guard(
                Ready,
                EntryGuard::new("4+ messages and (3+ pages or 60% scrolled)", |s| {
                    s.messages_sent >= 4 && (s.pages_viewed >= 3 || s.scroll_depth >= 0.6)
                }),
            )
            .with_guard(Dormant, EntryGuard::new("idle 90s", |s| s.idle_secs >= 90))
            .with_guard(Exiting, EntryGuard::new("exit intent", |s| s.exit_intent))
    }

    /// Replace the outgoing edges of `from` (builder style).
    pub fn with_edges(mut self, from: BehaviorState, to: &[BehaviorState]) -> Self {
        self.adjacency.insert(from, to.to_vec());
        self
    }

    pub fn with_guard(mut self, state: BehaviorState, guard: EntryGuard) -> Self {
        self.guards.insert(state, guard);
        self
    }

    /// Outgoing edges of `from`, in priority order.
    pub fn neighbors(&self, from: BehaviorState) -> &[BehaviorState] {
        self.adjacency.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn guard(&self, state: BehaviorState) -> Option<&EntryGuard> {
        self.guards.get(&state)
    }

    pub fn is_allowed(&self, from: BehaviorState, to: BehaviorState) -> bool {
        self.neighbors(from).contains(&to)
    }

    /// Validate an explicit transition against the adjacency table.
    pub fn check(
        &self,
        from: BehaviorState,
        to: BehaviorState,
        reason: &str,
    ) -> Result<(), TransitionError> {
        if self.is_allowed(from, to) {
            Ok(())
        } else {
            Err(TransitionError {
                from,
                to,
                reason: reason.to_string(),
            })
        }
    }

    /// The first neighbor of `from` whose entry guard passes. States without
    /// a guard are never entered automatically.
    pub fn find_best_transition(
        &self,
        from: BehaviorState,
        signals: &HydratedSignals,
    ) -> Option<BehaviorState> {
        let signals = signals.clone().normalized();
        self.neighbors(from)
            .iter()
            .copied()
            .find(|to| self.guard(*to).is_some_and(|g| g.allows(&signals)))
    }
}
