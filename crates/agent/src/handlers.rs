//! Default state handlers.
//!
//! One `ConversationHandler` serves every state. The state only changes
//! the directive steering the reply and the transition requested after a
//! visitor message.

use crate::graph::TransitionGraph;
use crate::handler::{HandlerContext, HandlerOutcome, StateHandler};
use crate::respond::Reply;
use async_trait::async_trait;
use concierge_core::actions::{Actions, ScheduledEvent, UiEffect, Utterance};
use concierge_core::error::HandlerError;
use concierge_core::event::{EventKind, EventSource};
use concierge_core::message::{EntryKind, MemoryEntry};
use concierge_core::signals::HydratedSignals;
use concierge_core::state::BehaviorState;
use concierge_memory::region::{DIRECTIVE, VISITOR};
use concierge_memory::ContextStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Key of the single nudge scheduled on entering `dormant`.
pub const DORMANT_NUDGE_KEY: &str = "dormant_nudge";

const TOUR_INTRO: &str = "Happy to show you around. Let's start with the highlights.";
const GOODBYE: &str = "Thanks for stopping by. Come back any time!";
const RESET_ACK: &str = "Fresh start. What can I help you with?";

/// The directive placed in the `directive` region for `state`.
pub fn directive_for(state: BehaviorState) -> &'static str {
    match state {
        BehaviorState::Greeting => "Greet the visitor briefly and ask what brought them here.",
        BehaviorState::Curious => {
            "The visitor is browsing. Answer plainly and point to one relevant page."
        }
        BehaviorState::Engaged => "Continue the conversation. Be specific and concise.",
        BehaviorState::Ready => {
            "The visitor shows intent. Answer, then offer the next concrete step."
        }
        BehaviorState::Returning => "Welcome the visitor back and build on what you know.",
        BehaviorState::Dormant => "The visitor went quiet. Offer one short, low-pressure nudge.",
        BehaviorState::Exiting => "The visitor is leaving. Offer one useful parting note.",
        BehaviorState::Tour => "Guide the visitor through the site one step at a time.",
    }
}

/// The state requested after a visitor message in `state`.
pub fn next_after_message(
    graph: &TransitionGraph,
    state: BehaviorState,
    signals: &HydratedSignals,
) -> Option<BehaviorState> {
    use BehaviorState::*;

    match state {
        Greeting if signals.is_returning => Some(Returning),
        Greeting => Some(Curious),
        Engaged => graph
            .guard(Ready)
            .is_some_and(|guard| guard.allows(signals))
            .then_some(Ready),
        Ready | Tour => None,
        Curious | Returning | Dormant | Exiting => Some(Engaged),
    }
}

/// The handler used for every state unless the host registers its own.
#[derive(Debug, Clone)]
pub struct ConversationHandler {
    dormant_nudge: Duration,
}

impl ConversationHandler {
    pub fn new(dormant_nudge: Duration) -> Self {
        Self { dormant_nudge }
    }

    async fn on_message(
        &self,
        ctx: &HandlerContext<'_>,
        text: &str,
    ) -> Result<HandlerOutcome, HandlerError> {
        if text.trim().is_empty() {
            return Ok(HandlerOutcome::stay());
        }

        let store = with_directive(ctx.store, ctx.state).append(MemoryEntry::user(text));
        let next = next_after_message(ctx.graph, ctx.state, ctx.signals);

        match ctx.responder.respond(&store, ctx.actions, ctx.cancel).await {
            Reply::Cancelled => Ok(HandlerOutcome::update(store)),
            reply => {
                let store = store.append(reply_entry(ctx.store, &reply));
                Ok(match next {
                    Some(next) => HandlerOutcome::transition(store, next),
                    None => HandlerOutcome::update(store),
                })
            }
        }
    }

    async fn on_command(
        &self,
        ctx: &HandlerContext<'_>,
        name: &str,
        args: &[String],
    ) -> Result<HandlerOutcome, HandlerError> {
        let command = name.trim_start_matches('/');
        let target = match command {
            "tour" => Some(BehaviorState::Tour),
            "bye" => Some(BehaviorState::Exiting),
            _ => None,
        };
        // Unreachable targets go to the scheduler untouched, with no side effects.
        if let Some(target) = target.filter(|to| !ctx.graph.is_allowed(ctx.state, *to)) {
            return Ok(HandlerOutcome::transition(ctx.store.clone(), target));
        }

        match command {
            "tour" => {
                ctx.actions
                    .dispatch_ui_effect(UiEffect::new("start_tour", json!({ "args": args })));
                ctx.actions.speak(Utterance::Text(TOUR_INTRO.into())).await;
                let store = ctx
                    .store
                    .append(MemoryEntry::assistant(TOUR_INTRO).with_metadata("command", json!("tour")));
                Ok(HandlerOutcome::transition(store, BehaviorState::Tour)
                    .with_params(json!({ "step": 1 })))
            }
            "reset" => {
                let store = reset(ctx.store);
                ctx.actions.speak(Utterance::Text(RESET_ACK.into())).await;
                Ok(HandlerOutcome::update(store))
            }
            "bye" => {
                ctx.actions.speak(Utterance::Text(GOODBYE.into())).await;
                let store = ctx
                    .store
                    .append(MemoryEntry::assistant(GOODBYE).with_metadata("command", json!("bye")));
                Ok(HandlerOutcome::transition(store, BehaviorState::Exiting))
            }
            other => {
                ctx.actions.log(
                    "unknown command",
                    Some(json!({ "command": other, "state": ctx.state.as_str() })),
                );
                Ok(HandlerOutcome::stay())
            }
        }
    }

    async fn on_nudge(&self, ctx: &HandlerContext<'_>) -> Result<HandlerOutcome, HandlerError> {
        let store = with_directive(ctx.store, BehaviorState::Dormant);
        match ctx.responder.respond(&store, ctx.actions, ctx.cancel).await {
            Reply::Cancelled => Ok(HandlerOutcome::stay()),
            reply => Ok(HandlerOutcome::update(
                store.append(reply_entry(ctx.store, &reply).with_metadata("nudge", json!(true))),
            )),
        }
    }
}

impl Default for ConversationHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(45))
    }
}

#[async_trait]
impl StateHandler for ConversationHandler {
    async fn handle(&self, ctx: HandlerContext<'_>) -> Result<HandlerOutcome, HandlerError> {
        match &ctx.event.kind {
            EventKind::Message { text } => self.on_message(&ctx, text).await,
            EventKind::Command { name, args } => self.on_command(&ctx, name, args).await,
            EventKind::Navigation { path, title } => {
                let note = match title {
                    Some(title) => format!("Visitor is viewing {path} ({title})."),
                    None => format!("Visitor is viewing {path}."),
                };
                let store = ctx.store.set_region(VISITOR, &note, None);
                Ok(match ctx.graph.find_best_transition(ctx.state, ctx.signals) {
                    Some(next) => HandlerOutcome::transition(store, next),
                    None => HandlerOutcome::update(store),
                })
            }
            EventKind::Idle { .. }
                if ctx.state == BehaviorState::Dormant
                    && ctx.event.source == EventSource::Scheduled =>
            {
                self.on_nudge(&ctx).await
            }
            EventKind::Idle { .. } | EventKind::Click { .. } => {
                Ok(match ctx.graph.find_best_transition(ctx.state, ctx.signals) {
                    Some(next) => HandlerOutcome::transition(ctx.store.clone(), next),
                    None => HandlerOutcome::stay(),
                })
            }
            EventKind::Scroll { .. } | EventKind::Hover { .. } | EventKind::Focus | EventKind::Blur => {
                debug!(state = %ctx.state, event = ctx.event.kind.name(), "Passive event reached handler");
                Ok(HandlerOutcome::stay())
            }
        }
    }

    fn on_enter(&self, state: BehaviorState, _params: &serde_json::Value, actions: &dyn Actions) {
        if state == BehaviorState::Dormant {
            actions.schedule_event(
                ScheduledEvent {
                    kind: EventKind::Idle {
                        seconds: self.dormant_nudge.as_secs(),
                    },
                    key: Some(DORMANT_NUDGE_KEY.into()),
                },
                self.dormant_nudge,
            );
        }
    }
}

/// The same handler registered for every state.
pub fn default_handlers(dormant_nudge: Duration) -> HashMap<BehaviorState, Arc<dyn StateHandler>> {
    let handler: Arc<dyn StateHandler> = Arc::new(ConversationHandler::new(dormant_nudge));
    BehaviorState::ALL
        .into_iter()
        .map(|state| (state, handler.clone()))
        .collect()
}

fn with_directive(store: &ContextStore, state: BehaviorState) -> ContextStore {
    store.set_region_entries(
        DIRECTIVE,
        vec![
            MemoryEntry::system(directive_for(state))
                .with_kind(EntryKind::Directive)
                .internal(),
        ],
        None,
    )
}

fn reply_entry(store: &ContextStore, reply: &Reply) -> MemoryEntry {
    let text = reply.text().unwrap_or_default();
    let entry = MemoryEntry::assistant(text).named(store.speaker_label());
    if reply.is_fallback() {
        entry.with_metadata("fallback", json!(true))
    } else {
        entry
    }
}

/// Drop the conversation and every compressible region.
fn reset(store: &ContextStore) -> ContextStore {
    store.filter(|entry| {
        entry
            .region
            .as_deref()
            .is_some_and(|region| store.region_config(region).is_pinned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::respond::Responder;
    use concierge_core::event::Event;
    use concierge_core::message::Role;
    use concierge_core::testing::{RecordingActions, ScriptedGenerator};
    use concierge_memory::region::PROFILE;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        store: ContextStore,
        signals: HydratedSignals,
        params: serde_json::Value,
        actions: RecordingActions,
        responder: Responder,
        graph: TransitionGraph,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(replies: &[&str]) -> Self {
            Self {
                store: ContextStore::with_builtin_regions("Concierge"),
                signals: HydratedSignals::default(),
                params: serde_json::Value::Null,
                actions: RecordingActions::new(),
                responder: Responder::new(Some(Arc::new(ScriptedGenerator::new(
                    replies.iter().copied(),
                )))),
                graph: TransitionGraph::builtin(),
                cancel: CancellationToken::new(),
            }
        }

        async fn run(&self, state: BehaviorState, event: Event) -> HandlerOutcome {
            let ctx = HandlerContext {
                state,
                store: &self.store,
                event: &event,
                signals: &self.signals,
                params: &self.params,
                actions: &self.actions,
                responder: &self.responder,
                graph: &self.graph,
                cancel: &self.cancel,
            };
            ConversationHandler::default().handle(ctx).await.unwrap()
        }
    }

    fn store_of(outcome: &HandlerOutcome) -> &ContextStore {
        match outcome {
            HandlerOutcome::Advance { store, .. } => store,
            HandlerOutcome::Stay => panic!("expected advance"),
        }
    }

    #[tokio::test]
    async fn message_appends_exchange_and_moves_on() {
        let fixture = Fixture::new(&["Welcome! What brings you here?"]);
        let outcome = fixture.run(BehaviorState::Greeting, Event::message("hi")).await;

        assert_eq!(outcome.next_state(), Some(BehaviorState::Curious));
        let store = store_of(&outcome);
        let exchange: Vec<_> = store.entries().iter().filter(|e| e.is_exchange()).collect();
        assert_eq!(exchange.len(), 2);
        assert_eq!(exchange[0].role, Role::User);
        assert_eq!(exchange[1].content, "Welcome! What brings you here?");
        assert_eq!(store.region(DIRECTIVE).len(), 1);
        assert_eq!(fixture.actions.spoken(), vec!["Welcome! What brings you here?"]);
    }

    #[tokio::test]
    async fn returning_visitor_is_routed_to_returning() {
        let mut fixture = Fixture::new(&["Welcome back!"]);
        fixture.signals.is_returning = true;
        let outcome = fixture.run(BehaviorState::Greeting, Event::message("hello again")).await;
        assert_eq!(outcome.next_state(), Some(BehaviorState::Returning));
    }

    #[tokio::test]
    async fn engaged_moves_to_ready_only_with_depth() {
        let mut fixture = Fixture::new(&["Sure.", "Here is pricing."]);
        fixture.signals.messages_sent = 5;
        let outcome = fixture.run(BehaviorState::Engaged, Event::message("pricing?")).await;
        assert_eq!(outcome.next_state(), None);

        fixture.signals.pages_viewed = 3;
        let outcome = fixture.run(BehaviorState::Engaged, Event::message("pricing?")).await;
        assert_eq!(outcome.next_state(), Some(BehaviorState::Ready));
    }

    #[tokio::test]
    async fn fallback_reply_is_marked() {
        let mut fixture = Fixture::new(&[]);
        fixture.responder = Responder::new(None);
        let outcome = fixture.run(BehaviorState::Curious, Event::message("hello?")).await;
        let last = store_of(&outcome).last_by_role(Role::Assistant).unwrap();
        assert_eq!(last.metadata.get("fallback"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn tour_command_requests_tour_with_params() {
        let fixture = Fixture::new(&[]);
        let outcome = fixture.run(BehaviorState::Curious, Event::command("/tour")).await;
        match outcome {
            HandlerOutcome::Advance { next, params, .. } => {
                assert_eq!(next, Some(BehaviorState::Tour));
                assert_eq!(params["step"], 1);
            }
            HandlerOutcome::Stay => panic!("expected advance"),
        }
        assert_eq!(fixture.actions.effects()[0].name, "start_tour");
    }

    #[tokio::test]
    async fn reset_keeps_only_pinned_regions() {
        let mut fixture = Fixture::new(&[]);
        fixture.store = fixture
            .store
            .set_region(PROFILE, "Likes demos", None)
            .set_region(DIRECTIVE, "be brief", None)
            .append(MemoryEntry::user("hi"))
            .append(MemoryEntry::assistant("hello"));

        let outcome = fixture.run(BehaviorState::Engaged, Event::command("reset")).await;
        let store = store_of(&outcome);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].content, "Likes demos");
        assert_eq!(fixture.actions.spoken(), vec![RESET_ACK]);
    }

    #[tokio::test]
    async fn unreachable_command_target_has_no_side_effects() {
        let fixture = Fixture::new(&[]);
        let outcome = fixture.run(BehaviorState::Greeting, Event::command("tour")).await;
        assert_eq!(outcome.next_state(), Some(BehaviorState::Tour));
        assert!(store_of(&outcome).is_empty());

        let outcome = fixture.run(BehaviorState::Returning, Event::command("bye")).await;
        assert_eq!(outcome.next_state(), Some(BehaviorState::Exiting));

        assert!(fixture.actions.spoken().is_empty());
        assert!(fixture.actions.effects().is_empty());
    }

    #[tokio::test]
    async fn bye_heads_for_exiting_and_unknown_commands_stay() {
        let fixture = Fixture::new(&[]);
        let outcome = fixture.run(BehaviorState::Engaged, Event::command("bye")).await;
        assert_eq!(outcome.next_state(), Some(BehaviorState::Exiting));

        let outcome = fixture.run(BehaviorState::Engaged, Event::command("dance")).await;
        assert!(matches!(outcome, HandlerOutcome::Stay));
        assert_eq!(fixture.actions.logs(), vec!["unknown command"]);
    }

    #[tokio::test]
    async fn scheduled_idle_nudges_only_when_dormant() {
        let fixture = Fixture::new(&["Still there? Happy to help."]);
        let nudge = Event::scheduled(EventKind::Idle { seconds: 45 });

        let outcome = fixture.run(BehaviorState::Engaged, nudge.clone()).await;
        assert!(matches!(outcome, HandlerOutcome::Stay));

        let outcome = fixture.run(BehaviorState::Dormant, nudge).await;
        let last = store_of(&outcome).last_by_role(Role::Assistant).unwrap();
        assert_eq!(last.metadata.get("nudge"), Some(&json!(true)));
        assert_eq!(outcome.next_state(), None);
    }

    #[test]
    fn entering_dormant_schedules_one_nudge() {
        let actions = RecordingActions::new();
        let handler = ConversationHandler::new(Duration::from_secs(30));
        handler.on_enter(BehaviorState::Engaged, &serde_json::Value::Null, &actions);
        assert!(actions.scheduled().is_empty());

        handler.on_enter(BehaviorState::Dormant, &serde_json::Value::Null, &actions);
        let scheduled = actions.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0.key.as_deref(), Some(DORMANT_NUDGE_KEY));
        assert_eq!(scheduled[0].1, Duration::from_secs(30));
    }
}
