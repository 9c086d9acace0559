//! Runtime and per-session objects.
//!
//! A `Runtime` holds the capabilities every session shares and is built
//! once by the host. Each visitor session gets its own `Session`, which
//! owns a scheduler and an enrichment runner and applies background
//! results before the next event is dispatched.

use crate::graph::TransitionGraph;
use crate::handler::StateHandler;
use crate::handlers::default_handlers;
use crate::respond::Responder;
use crate::scheduler::{Dispatch, Scheduler};
use concierge_config::{AppConfig, ContextConfig};
use concierge_core::actions::Actions;
use concierge_core::error::TransitionError;
use concierge_core::event::{Event, EventBus, EventKind};
use concierge_core::generation::{GenerationOptions, Generator};
use concierge_core::message::{EntryKind, MemoryEntry};
use concierge_core::profile::{ProfileStore, SessionSummary};
use concierge_core::signals::HydratedSignals;
use concierge_core::state::BehaviorState;
use concierge_memory::region::{INNER_VOICE, PROFILE, SYSTEM};
use concierge_memory::{CompactionConfig, ContextStore, RegionRegistry};
use concierge_workflow::{
    EnrichmentContext, EnrichmentInput, EnrichmentResult, EnrichmentRunner, RunReport,
    clear_session, record_session_summary,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn compaction_config(config: &ContextConfig) -> CompactionConfig {
    CompactionConfig {
        ceiling: config.ceiling,
        target: config.target,
        preserve_recent: config.preserve_recent,
        refresh_after_exchanges: config.refresh_after_exchanges,
    }
}

/// Capabilities shared by every session of a host.
#[derive(Clone)]
pub struct Runtime {
    config: Arc<AppConfig>,
    generator: Option<Arc<dyn Generator>>,
    profiles: Arc<dyn ProfileStore>,
    registry: Arc<RegionRegistry>,
    graph: Arc<TransitionGraph>,
    bus: Arc<EventBus>,
}

impl Runtime {
    pub fn new(config: AppConfig, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            config: Arc::new(config),
            generator: None,
            profiles,
            registry: Arc::new(RegionRegistry::builtin()),
            graph: Arc::new(TransitionGraph::builtin()),
            bus: Arc::new(EventBus::new(256)),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_registry(mut self, registry: RegionRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_graph(mut self, graph: TransitionGraph) -> Self {
        self.graph = Arc::new(graph);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn profiles(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    pub fn graph(&self) -> &Arc<TransitionGraph> {
        &self.graph
    }

    /// Open a session for `visitor_id` with the default handlers.
    pub async fn open_session(&self, visitor_id: &str, actions: Arc<dyn Actions>) -> Session {
        let handlers =
            default_handlers(Duration::from_secs(self.config.scheduler.dormant_nudge_secs));
        self.open_session_with(visitor_id, actions, handlers).await
    }

    /// Open a session with host-supplied handlers.
    pub async fn open_session_with(
        &self,
        visitor_id: &str,
        actions: Arc<dyn Actions>,
        handlers: HashMap<BehaviorState, Arc<dyn StateHandler>>,
    ) -> Session {
        let session_id = uuid::Uuid::new_v4().to_string();
        let config = &*self.config;
        let store = self.seed_store(visitor_id).await;

        let responder = Arc::new(Responder::from_config(
            self.generator.clone(),
            &config.generation,
        ));
        let scheduler = Scheduler::new(session_id.clone(), store, responder.clone(), actions)
            .with_graph(self.graph.clone())
            .with_handlers(handlers)
            .with_compaction(compaction_config(&config.context))
            .with_bus(self.bus.clone())
            .strict(config.scheduler.strict_transitions);

        let context = Arc::new(EnrichmentContext {
            generator: self.generator.clone(),
            profiles: self.profiles.clone(),
            timeout: responder.timeout(),
            options: GenerationOptions {
                stream: false,
                ..responder.options().clone()
            },
            max_profile_chars: config.profile.max_profile_chars,
            max_inner_voice_chars: config.profile.max_inner_voice_chars,
        });
        let (runner, results) = EnrichmentRunner::builtin(&config.enrichment, context);

        info!(session_id = %session_id, visitor = visitor_id, "Session opened");

        Session {
            id: session_id,
            visitor_id: visitor_id.to_string(),
            scheduler,
            runner: runner.with_bus(self.bus.clone()),
            results,
            background: None,
            profiles: self.profiles.clone(),
            turns: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// A fresh store carrying the persisted profile and inner voice.
    async fn seed_store(&self, visitor_id: &str) -> ContextStore {
        let label = self.config.context.speaker_label.clone();
        let mut store = ContextStore::new(label.clone(), self.registry.clone()).set_region(
            SYSTEM,
            &format!("You are {label}, the assistant on this website."),
            None,
        );

        match self.profiles.profile(visitor_id).await {
            Ok(Some(text)) => store = store.set_region(PROFILE, &text, None),
            Ok(None) => {}
            Err(e) => warn!(visitor = visitor_id, error = %e, "Failed to load visitor profile"),
        }
        match self.profiles.inner_voice(visitor_id).await {
            Ok(Some(text)) => {
                store = store.set_region_entries(
                    INNER_VOICE,
                    vec![
                        MemoryEntry::system(text)
                            .with_kind(EntryKind::Enrichment)
                            .internal(),
                    ],
                    None,
                )
            }
            Ok(None) => {}
            Err(e) => warn!(visitor = visitor_id, error = %e, "Failed to load inner voice"),
        }
        store
    }
}

/// One visitor session. Events are handled strictly one at a time.
pub struct Session {
    id: String,
    visitor_id: String,
    scheduler: Scheduler,
    runner: EnrichmentRunner,
    results: mpsc::Receiver<EnrichmentResult>,
    background: Option<JoinHandle<Vec<(String, RunReport)>>>,
    profiles: Arc<dyn ProfileStore>,
    turns: u64,
    cancel: CancellationToken,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    pub fn state(&self) -> BehaviorState {
        self.scheduler.state()
    }

    pub fn store(&self) -> &ContextStore {
        self.scheduler.store()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Visitor messages handled so far.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// A token that cancels the reply currently being streamed.
    ///
    /// A token cancelled while no reply is in flight is discarded when the
    /// next event arrives; fetch a fresh handle after each cancel.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle one event.
    pub async fn handle(
        &mut self,
        event: &Event,
        signals: &HydratedSignals,
    ) -> Result<Dispatch, TransitionError> {
        self.apply_results();

        if self.cancel.is_cancelled() {
            debug!(session_id = %self.id, "Discarding stale cancel token");
            self.cancel = CancellationToken::new();
        }
        let result = self.scheduler.dispatch(event, signals, &self.cancel).await;

        if matches!(event.kind, EventKind::Message { .. }) {
            self.turns += 1;
            self.tick(signals);
        }
        result
    }

    /// Wait for background enrichment in flight and apply its results.
    pub async fn settle(&mut self) -> Vec<(String, RunReport)> {
        let reports = match self.background.take() {
            Some(handle) => match handle.await {
                Ok(reports) => reports,
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Enrichment task failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.apply_results();
        reports
    }

    /// Finish the session and record its summary.
    pub async fn close(mut self) -> Option<SessionSummary> {
        self.settle().await;
        let summary = record_session_summary(
            &*self.profiles,
            &self.visitor_id,
            &self.id,
            self.scheduler.store(),
            self.turns,
        )
        .await;
        if let Err(e) = clear_session(&*self.profiles, &self.visitor_id, &self.id).await {
            warn!(session_id = %self.id, error = %e, "Failed to clear enrichment counters");
        }
        info!(session_id = %self.id, turns = self.turns, "Session closed");
        summary
    }

    fn tick(&mut self, signals: &HydratedSignals) {
        let input = EnrichmentInput {
            session_id: self.id.clone(),
            visitor_id: self.visitor_id.clone(),
            turn: self.turns,
            store: self.scheduler.store().clone(),
            signals: signals.clone().normalized(),
        };
        if let Some(handle) = self.runner.tick(input) {
            self.background = Some(handle);
        }
    }

    fn apply_results(&mut self) {
        while let Ok(result) = self.results.try_recv() {
            let Some(region) = result.region.as_deref() else {
                continue;
            };
            debug!(
                session_id = %self.id,
                subprocess = %result.subprocess,
                region,
                turn = result.turn,
                "Applying enrichment result"
            );
            self.scheduler.attach_region(region, &result.text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_config::SubprocessConfig;
    use concierge_core::testing::{RecordingActions, ScriptedGenerator};
    use concierge_memory::InMemoryProfileStore;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.enrichment.profile_refresh = SubprocessConfig {
            enabled: true,
            interval: 2,
            max_per_session: 3,
            cooldown_secs: 0,
            value_check: false,
        };
        config.enrichment.inner_voice.enabled = false;
        config
    }

    #[tokio::test]
    async fn session_seeds_persisted_profile() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles.set_profile("v1", "Works at Acme.").await.unwrap();
        let runtime = Runtime::new(config(), profiles);

        let session = runtime
            .open_session("v1", Arc::new(RecordingActions::new()))
            .await;
        let profile = session.store().region(PROFILE);
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].content, "Works at Acme.");
        assert_eq!(session.state(), BehaviorState::Greeting);
    }

    #[tokio::test]
    async fn enrichment_lands_before_the_next_event() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let generator = Arc::new(ScriptedGenerator::new([
            "Hello!",
            "Sure, we have a demo.",
            "Interested in a demo.",
            "Anything else?",
        ]));
        let runtime = Runtime::new(config(), profiles.clone()).with_generator(generator);
        let actions = Arc::new(RecordingActions::new());
        let mut session = runtime.open_session("v1", actions.clone()).await;
        let signals = HydratedSignals::default();

        session.handle(&Event::message("hi"), &signals).await.unwrap();
        session.settle().await;
        session
            .handle(&Event::message("Can I get a demo?"), &signals)
            .await
            .unwrap();
        let reports = session.settle().await;

        assert!(reports.iter().any(|(name, report)| {
            name == "profile_refresh" && matches!(report, RunReport::Fired { .. })
        }));
        let profile = session.store().region(PROFILE);
        assert_eq!(profile.len(), 1);
        assert!(profile[0].content.contains("Interested in a demo."));
        assert!(
            profiles
                .profile("v1")
                .await
                .unwrap()
                .is_some_and(|p| p.contains("Interested in a demo."))
        );

        session
            .handle(&Event::message("thanks"), &signals)
            .await
            .unwrap();
        assert_eq!(session.turns(), 3);
        assert_eq!(actions.spoken().len(), 3);
    }

    #[tokio::test]
    async fn close_records_a_session_summary() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let generator = Arc::new(ScriptedGenerator::new(["Hi there."]));
        let runtime = Runtime::new(config(), profiles.clone()).with_generator(generator);
        let mut session = runtime
            .open_session("v1", Arc::new(RecordingActions::new()))
            .await;

        session
            .handle(&Event::message("What does pricing look like?"), &HydratedSignals::default())
            .await
            .unwrap();
        let id = session.id().to_string();
        let summary = session.close().await.unwrap();

        assert_eq!(summary.session_id, id);
        assert_eq!(summary.turns, 1);
        assert_eq!(profiles.session_summaries("v1").await.unwrap().len(), 1);
        assert!(profiles.record("v1").await.counters.is_empty());
    }

    #[tokio::test]
    async fn cancel_between_events_does_not_silence_the_next_reply() {
        let generator = Arc::new(ScriptedGenerator::new(["Hello!", "Here is more."]));
        let runtime = Runtime::new(config(), Arc::new(InMemoryProfileStore::new()))
            .with_generator(generator);
        let actions = Arc::new(RecordingActions::new());
        let mut session = runtime.open_session("v1", actions.clone()).await;
        let signals = HydratedSignals::default();

        session.handle(&Event::message("hi"), &signals).await.unwrap();
        session.cancel_handle().cancel();
        session
            .handle(&Event::message("tell me more"), &signals)
            .await
            .unwrap();

        assert_eq!(actions.spoken(), vec!["Hello!", "Here is more."]);
        assert!(!session.cancel_handle().is_cancelled());
        assert_eq!(session.store().exchange_count(), 4);
    }

    #[tokio::test]
    async fn strict_config_surfaces_illegal_requests() {
        let mut config = config();
        config.scheduler.strict_transitions = true;
        let runtime = Runtime::new(config, Arc::new(InMemoryProfileStore::new()));
        let mut session = runtime
            .open_session("v1", Arc::new(RecordingActions::new()))
            .await;

        // Tour is not reachable from greeting.
        let err = session
            .handle(&Event::command("tour"), &HydratedSignals::default())
            .await
            .unwrap_err();
        assert_eq!((err.from, err.to), (BehaviorState::Greeting, BehaviorState::Tour));
        assert_eq!(session.state(), BehaviorState::Greeting);
        assert_eq!(session.turns(), 0);
    }
}
