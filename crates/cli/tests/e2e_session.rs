//! End-to-end tests for the Concierge runtime.
//!
//! These exercise the full path from visitor events to spoken replies,
//! persisted profiles and session summaries, plus the CLI binary itself.

use std::process::Command;
use std::sync::Arc;

use concierge_agent::{Dispatch, Runtime};
use concierge_config::AppConfig;
use concierge_core::event::{Event, EventKind, RuntimeEvent};
use concierge_core::profile::ProfileStore;
use concierge_core::signals::HydratedSignals;
use concierge_core::state::BehaviorState;
use concierge_core::testing::{RecordingActions, ScriptedGenerator};
use concierge_memory::FileProfileStore;
use concierge_memory::region::PROFILE;
use concierge_workflow::RunReport;

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.enrichment.profile_refresh.interval = 2;
    config.enrichment.inner_voice.enabled = false;
    config
}

// ── Library pipeline ─────────────────────────────────────────────────────

#[tokio::test]
async fn visitor_journey_persists_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let profiles = Arc::new(FileProfileStore::new(dir.path()));
    let generator = Arc::new(ScriptedGenerator::new([
        "Welcome! Looking for anything in particular?",
        "Yes, we run live demos every week.",
        "Asked about a live demo.",
        "Plans start at the team tier.",
    ]));
    let runtime = Runtime::new(config(), profiles.clone()).with_generator(generator.clone());
    let mut bus = runtime.bus().subscribe();
    let actions = Arc::new(RecordingActions::new());
    let mut session = runtime.open_session("v1", actions.clone()).await;

    let quiet = HydratedSignals::default();
    let first = session
        .handle(&Event::message("Hi, just looking around."), &quiet)
        .await
        .unwrap();
    assert_eq!(
        first,
        Dispatch::Transitioned {
            from: BehaviorState::Greeting,
            to: BehaviorState::Curious
        }
    );
    // Let the first turn's background run finish so the next tick is not busy.
    session.settle().await;

    session
        .handle(&Event::message("Do you offer a demo?"), &quiet)
        .await
        .unwrap();
    let reports = session.settle().await;
    assert!(
        reports
            .iter()
            .any(|(name, r)| name == "profile_refresh" && matches!(r, RunReport::Fired { .. }))
    );
    assert_eq!(session.state(), BehaviorState::Engaged);

    let deep = HydratedSignals {
        messages_sent: 4,
        pages_viewed: 3,
        ..Default::default()
    };
    session
        .handle(&Event::message("What does pricing look like?"), &deep)
        .await
        .unwrap();
    session.settle().await;
    assert_eq!(session.state(), BehaviorState::Ready);

    let path: Vec<(BehaviorState, BehaviorState)> = session
        .scheduler()
        .transitions()
        .iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        path,
        vec![
            (BehaviorState::Greeting, BehaviorState::Curious),
            (BehaviorState::Curious, BehaviorState::Engaged),
            (BehaviorState::Engaged, BehaviorState::Ready),
        ]
    );

    // The enrichment result was attached before the third turn.
    let profile_region = session.store().region(PROFILE);
    assert_eq!(profile_region.len(), 1);
    assert_eq!(profile_region[0].content, "Asked about a live demo.");

    let summary = session.close().await.unwrap();
    assert_eq!(summary.turns, 3);
    assert_eq!(actions.spoken().len(), 3);
    assert_eq!(generator.call_count(), 4);

    let mut fired = 0;
    while let Ok(event) = bus.try_recv() {
        if matches!(event.as_ref(), RuntimeEvent::EnrichmentFired { .. }) {
            fired += 1;
        }
    }
    assert_eq!(fired, 1);

    // A fresh session starts from what the first one learned.
    let reopened = FileProfileStore::new(dir.path());
    assert_eq!(
        reopened.profile("v1").await.unwrap().as_deref(),
        Some("Asked about a live demo.")
    );
    assert_eq!(reopened.session_summaries("v1").await.unwrap().len(), 1);

    let runtime = Runtime::new(config(), Arc::new(reopened));
    let mut second = runtime
        .open_session("v1", Arc::new(RecordingActions::new()))
        .await;
    assert_eq!(second.store().region(PROFILE)[0].content, "Asked about a live demo.");

    let returning = HydratedSignals {
        is_returning: true,
        visit_count: 2,
        ..Default::default()
    };
    second
        .handle(&Event::message("I'm back"), &returning)
        .await
        .unwrap();
    assert_eq!(second.state(), BehaviorState::Returning);
}

#[tokio::test]
async fn unconfigured_generator_still_answers() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(config(), Arc::new(FileProfileStore::new(dir.path())))
        .with_generator(Arc::new(ScriptedGenerator::unconfigured()));
    let actions = Arc::new(RecordingActions::new());
    let mut session = runtime.open_session("v2", actions.clone()).await;

    for text in ["hello", "anyone there?"] {
        session
            .handle(&Event::message(text), &HydratedSignals::default())
            .await
            .unwrap();
    }
    let reports = session.settle().await;

    assert_eq!(actions.spoken().len(), 2);
    assert!(reports.iter().all(|(_, r)| matches!(r, RunReport::Skipped(_))));
    assert_eq!(session.state(), BehaviorState::Engaged);
}

#[tokio::test]
async fn passive_events_never_speak() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(config(), Arc::new(FileProfileStore::new(dir.path())));
    let actions = Arc::new(RecordingActions::new());
    let mut session = runtime.open_session("v3", actions.clone()).await;

    let scrolled = HydratedSignals {
        scroll_depth: 0.45,
        ..Default::default()
    };
    let result = session
        .handle(&Event::new(EventKind::Scroll { depth: 0.45 }), &scrolled)
        .await
        .unwrap();

    assert!(matches!(result, Dispatch::Transitioned { to: BehaviorState::Curious, .. }));
    assert!(actions.spoken().is_empty());
    assert_eq!(session.turns(), 0);
}

// ── CLI binary ───────────────────────────────────────────────────────────

fn concierge(home: &std::path::Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_concierge"));
    command
        .env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG")
        .env_remove("CONCIERGE_CONFIG")
        .env_remove("CONCIERGE_PROFILE_DIR");
    command
}

#[test]
fn graph_command_prints_adjacency() {
    let home = tempfile::tempdir().unwrap();
    let output = concierge(home.path()).arg("graph").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("greeting   -> curious, returning"));
    assert_eq!(stdout.lines().count(), BehaviorState::ALL.len());
}

#[test]
fn replay_command_runs_a_script() {
    let home = tempfile::tempdir().unwrap();
    let events = home.path().join("events.jsonl");
    std::fs::write(
        &events,
        "{\"type\":\"message\",\"text\":\"hi\"}\n{\"type\":\"command\",\"name\":\"bye\"}\n",
    )
    .unwrap();
    let replies = home.path().join("replies.txt");
    std::fs::write(&replies, "Welcome aboard!\n").unwrap();

    let output = concierge(home.path())
        .arg("replay")
        .arg(&events)
        .arg("--replies")
        .arg(&replies)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("🤖 Welcome aboard!"));
    assert!(stdout.contains("↪ greeting → curious"));
    assert!(stdout.contains("↪ curious → exiting"));
    assert!(stdout.contains("Final state: exiting"));
}

#[test]
fn config_show_prints_defaults() {
    let home = tempfile::tempdir().unwrap();
    let output = concierge(home.path()).args(["config", "show"]).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[context]"));
    assert!(stdout.contains("ceiling = 50"));
}
