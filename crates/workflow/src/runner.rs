//! Enrichment runner — evaluates gates and runs subprocesses off the
//! interactive path.
//!
//! One runner per session. `tick` spawns a background run and returns
//! immediately; results arrive on the channel handed out by `new` and are
//! applied by the session before its next event. A per-session mutex keeps
//! runs from overlapping: a tick that finds one in flight is skipped.

use crate::builtin::{InnerVoice, ProfileRefresh};
use crate::counters::{self, CounterKeys};
use crate::gate::{self, Gate, GatePolicy};
use crate::subprocess::{EnrichmentContext, EnrichmentInput, EnrichmentResult, EnrichmentSubprocess};
use chrono::Utc;
use concierge_config::EnrichmentConfig;
use concierge_core::event::{EventBus, RuntimeEvent};
use concierge_core::generation::{GenerationMessage, generate_text};
use concierge_core::message::Role;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// What happened to one subprocess on one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Fired { attached: bool },
    Skipped(Gate),
    Failed(String),
}

#[derive(Clone)]
pub struct EnrichmentRunner {
    subprocesses: Arc<Vec<Arc<dyn EnrichmentSubprocess>>>,
    context: Arc<EnrichmentContext>,
    bus: Option<Arc<EventBus>>,
    in_flight: Arc<Mutex<()>>,
    results: mpsc::Sender<EnrichmentResult>,
}

impl EnrichmentRunner {
    pub fn new(
        subprocesses: Vec<Arc<dyn EnrichmentSubprocess>>,
        context: Arc<EnrichmentContext>,
    ) -> (Self, mpsc::Receiver<EnrichmentResult>) {
        let (results, rx) = mpsc::channel(16);
        let runner = Self {
            subprocesses: Arc::new(subprocesses),
            context,
            bus: None,
            in_flight: Arc::new(Mutex::new(())),
            results,
        };
        (runner, rx)
    }

    /// A runner with the built-in profile refresh and inner voice.
    pub fn builtin(
        config: &EnrichmentConfig,
        context: Arc<EnrichmentContext>,
    ) -> (Self, mpsc::Receiver<EnrichmentResult>) {
        Self::new(
            vec![
                Arc::new(ProfileRefresh::new(GatePolicy::from(&config.profile_refresh)))
                    as Arc<dyn EnrichmentSubprocess>,
                Arc::new(InnerVoice::new(GatePolicy::from(&config.inner_voice))),
            ],
            context,
        )
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn subprocess_names(&self) -> Vec<String> {
        self.subprocesses.iter().map(|s| s.name().to_string()).collect()
    }

    /// Start a background run for this turn. Returns `None` when a run for
    /// this session is still in flight.
    pub fn tick(
        &self,
        input: EnrichmentInput,
    ) -> Option<tokio::task::JoinHandle<Vec<(String, RunReport)>>> {
        let Ok(guard) = self.in_flight.clone().try_lock_owned() else {
            debug!(session_id = %input.session_id, turn = input.turn, "Enrichment busy, skipping tick");
            for name in self.subprocess_names() {
                self.publish_skip(&input, &name, Gate::Busy);
            }
            return None;
        };

        let runner = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            runner.run_all(&input).await
        }))
    }

    /// Run every subprocess for this turn, waiting for any run in flight.
    pub async fn run_once(&self, input: &EnrichmentInput) -> Vec<(String, RunReport)> {
        let _guard = self.in_flight.lock().await;
        self.run_all(input).await
    }

    async fn run_all(&self, input: &EnrichmentInput) -> Vec<(String, RunReport)> {
        let mut reports = Vec::with_capacity(self.subprocesses.len());
        for subprocess in self.subprocesses.iter() {
            let report = self.run_subprocess(&**subprocess, input).await;
            reports.push((subprocess.name().to_string(), report));
        }
        reports
    }

    async fn run_subprocess(
        &self,
        subprocess: &dyn EnrichmentSubprocess,
        input: &EnrichmentInput,
    ) -> RunReport {
        let name = subprocess.name();
        let profiles = &*self.context.profiles;
        let visitor = input.visitor_id.as_str();
        let keys = CounterKeys::new(&input.session_id, name);

        let mut counters = match counters::load(profiles, visitor, &keys).await {
            Ok(counters) => counters,
            Err(e) => {
                warn!(subprocess = name, error = %e, "Failed to load enrichment counters");
                return RunReport::Failed(e.to_string());
            }
        };
        counters.turns_observed = counters.turns_observed.max(input.turn);

        let now = Utc::now();
        if let Err(gate) = gate::check(subprocess.policy(), &counters, now) {
            self.save_counters(name, visitor, &keys, &counters).await;
            self.publish_skip(input, name, gate);
            return RunReport::Skipped(gate);
        }

        // Capability gate: skip silently.
        let Some(generator) = self.context.available_generator() else {
            self.save_counters(name, visitor, &keys, &counters).await;
            self.publish_skip(input, name, Gate::Capability);
            return RunReport::Skipped(Gate::Capability);
        };

        // Cadence is recorded before any expensive call.
        counters.last_fired_turn = input.turn;
        counters.last_fired_at = Some(now);
        self.save_counters(name, visitor, &keys, &counters).await;

        if subprocess.policy().value_check {
            let request = self.context.request(vec![GenerationMessage::new(
                Role::User,
                subprocess.value_question(input),
            )]);
            let worth_it = match generate_text(&**generator, request, self.context.timeout).await {
                Ok(answer) => is_yes(&answer),
                Err(e) => {
                    warn!(subprocess = name, error = %e, "Value check failed, skipping");
                    false
                }
            };
            if !worth_it {
                self.publish_skip(input, name, Gate::ValueCheck);
                return RunReport::Skipped(Gate::ValueCheck);
            }
        }

        counters.fire_count += 1;
        self.save_counters(name, visitor, &keys, &counters).await;

        info!(
            subprocess = name,
            session_id = %input.session_id,
            turn = input.turn,
            fire_count = counters.fire_count,
            "Enrichment fired"
        );
        if let Some(bus) = &self.bus {
            bus.publish(RuntimeEvent::EnrichmentFired {
                session_id: input.session_id.clone(),
                subprocess: name.to_string(),
                turn: input.turn,
                timestamp: Utc::now(),
            });
        }

        match subprocess.run(input, &self.context).await {
            Ok(Some(result)) => {
                let attached = self.results.send(result).await.is_ok();
                RunReport::Fired { attached }
            }
            Ok(None) => RunReport::Fired { attached: false },
            Err(e) => {
                warn!(subprocess = name, error = %e, "Enrichment run failed");
                RunReport::Failed(e.to_string())
            }
        }
    }

    async fn save_counters(
        &self,
        name: &str,
        visitor: &str,
        keys: &CounterKeys,
        counters: &gate::EnrichmentCounters,
    ) {
        if let Err(e) = counters::save(&*self.context.profiles, visitor, keys, counters).await {
            warn!(subprocess = name, error = %e, "Failed to save enrichment counters");
        }
    }

    fn publish_skip(&self, input: &EnrichmentInput, name: &str, gate: Gate) {
        debug!(subprocess = name, turn = input.turn, gate = %gate, "Enrichment skipped");
        if let Some(bus) = &self.bus {
            bus.publish(RuntimeEvent::EnrichmentSkipped {
                session_id: input.session_id.clone(),
                subprocess: name.to_string(),
                gate: gate.as_str().to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

fn is_yes(answer: &str) -> bool {
    answer
        .trim_start()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
        .starts_with("yes")
}
