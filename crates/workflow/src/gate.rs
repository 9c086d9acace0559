//! Gate evaluation for enrichment subprocesses.
//!
//! The cheap gates (session cap, cadence, duplicate turn, cooldown) are pure
//! functions of the counters so the fire/skip decision can be reasoned about
//! and tested without a runtime.

use chrono::{DateTime, Utc};
use concierge_config::SubprocessConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-session, per-subprocess counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentCounters {
    pub turns_observed: u64,
    pub fire_count: u64,
    /// 0 = never fired
    pub last_fired_turn: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// Rate limits for one subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    pub enabled: bool,
    pub interval: u64,
    pub max_per_session: u64,
    pub cooldown: Option<Duration>,
    pub value_check: bool,
}

impl From<&SubprocessConfig> for GatePolicy {
    fn from(config: &SubprocessConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: config.interval,
            max_per_session: config.max_per_session,
            cooldown: (config.cooldown_secs > 0).then(|| Duration::from_secs(config.cooldown_secs)),
            value_check: config.value_check,
        }
    }
}

/// The gate that blocked a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Disabled,
    SessionCap,
    Cadence,
    DuplicateTurn,
    Cooldown,
    Capability,
    ValueCheck,
    /// Another run for the same session was still in flight
    Busy,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::SessionCap => "session_cap",
            Self::Cadence => "cadence",
            Self::DuplicateTurn => "duplicate_turn",
            Self::Cooldown => "cooldown",
            Self::Capability => "capability",
            Self::ValueCheck => "value_check",
            Self::Busy => "busy",
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session cap, then cadence, then duplicate turn.
pub fn evaluate_gates(
    turns: u64,
    interval: u64,
    last_fired_turn: u64,
    fire_count: u64,
    cap: u64,
) -> Result<(), Gate> {
    if fire_count >= cap {
        return Err(Gate::SessionCap);
    }
    if interval == 0 || turns == 0 || turns % interval != 0 {
        return Err(Gate::Cadence);
    }
    if turns == last_fired_turn {
        return Err(Gate::DuplicateTurn);
    }
    Ok(())
}

/// True when no cooldown applies or it has elapsed since the last fire.
pub fn cooldown_elapsed(
    last_fired_at: Option<DateTime<Utc>>,
    cooldown: Option<Duration>,
    now: DateTime<Utc>,
) -> bool {
    match (last_fired_at, cooldown) {
        (Some(last), Some(cooldown)) => (now - last)
            .to_std()
            .map(|elapsed| elapsed >= cooldown)
            .unwrap_or(false),
        _ => true,
    }
}

/// All counter-based gates for one policy.
pub fn check(
    policy: &GatePolicy,
    counters: &EnrichmentCounters,
    now: DateTime<Utc>,
) -> Result<(), Gate> {
    if !policy.enabled {
        return Err(Gate::Disabled);
    }
    evaluate_gates(
        counters.turns_observed,
        policy.interval,
        counters.last_fired_turn,
        counters.fire_count,
        policy.max_per_session,
    )?;
    if !cooldown_elapsed(counters.last_fired_at, policy.cooldown, now) {
        return Err(Gate::Cooldown);
    }
    Ok(())
}
