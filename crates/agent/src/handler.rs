//! The state-handler contract.
//!
//! Every behavioral state owns exactly one handler. The scheduler calls it
//! with the current store and the triggering event; the handler answers
//! with an outcome and never commits a transition itself.

use crate::graph::TransitionGraph;
use crate::respond::Responder;
use async_trait::async_trait;
use concierge_core::actions::Actions;
use concierge_core::error::HandlerError;
use concierge_core::event::Event;
use concierge_core::signals::HydratedSignals;
use concierge_core::state::BehaviorState;
use concierge_memory::ContextStore;
use tokio_util::sync::CancellationToken;

/// Everything a handler may read or use for one event.
pub struct HandlerContext<'a> {
    pub state: BehaviorState,
    pub store: &'a ContextStore,
    pub event: &'a Event,
    pub signals: &'a HydratedSignals,
    /// Params passed by the transition that entered this state
    pub params: &'a serde_json::Value,
    pub actions: &'a dyn Actions,
    pub responder: &'a Responder,
    pub graph: &'a TransitionGraph,
    /// Cancels an in-progress streamed reply
    pub cancel: &'a CancellationToken,
}

impl HandlerContext<'_> {
    /// Build a `HandlerError::Failed` for this state and event.
    pub fn fail(&self, message: impl Into<String>) -> HandlerError {
        HandlerError::Failed {
            state: self.state,
            event: self.event.kind.name().to_string(),
            message: message.into(),
        }
    }
}

/// What a handler decided.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// Nothing changes.
    Stay,
    /// Commit `store`, optionally moving to `next` with entry `params`.
    Advance {
        store: ContextStore,
        next: Option<BehaviorState>,
        params: serde_json::Value,
    },
}

impl HandlerOutcome {
    pub fn stay() -> Self {
        Self::Stay
    }

    /// Commit a new store without changing state.
    pub fn update(store: ContextStore) -> Self {
        Self::Advance {
            store,
            next: None,
            params: serde_json::Value::Null,
        }
    }

    pub fn transition(store: ContextStore, next: BehaviorState) -> Self {
        Self::Advance {
            store,
            next: Some(next),
            params: serde_json::Value::Null,
        }
    }

    /// Attach entry params for the next state. No effect on `Stay`.
    pub fn with_params(self, params: serde_json::Value) -> Self {
        match self {
            Self::Advance { store, next, .. } => Self::Advance {
                store,
                next,
                params,
            },
            Self::Stay => Self::Stay,
        }
    }

    pub fn next_state(&self) -> Option<BehaviorState> {
        match self {
            Self::Advance { next, .. } => *next,
            Self::Stay => None,
        }
    }
}

/// The handler owned by one behavioral state.
#[async_trait]
pub trait StateHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext<'_>) -> Result<HandlerOutcome, HandlerError>;

    /// Called once after the scheduler commits a transition into `state`.
    fn on_enter(&self, _state: BehaviorState, _params: &serde_json::Value, _actions: &dyn Actions) {}
}
