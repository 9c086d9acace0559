//! Persisted enrichment counters.
//!
//! The profile store is the single owner of these counters. Each field is a
//! separate counter key scoped by session and subprocess, so the counters
//! survive compaction and context resets.

use crate::gate::EnrichmentCounters;
use chrono::{TimeZone, Utc};
use concierge_core::error::PersistenceError;
use concierge_core::profile::ProfileStore;

/// Counter keys for one (session, subprocess) pair.
#[derive(Debug, Clone)]
pub struct CounterKeys {
    prefix: String,
}

fn session_prefix(session_id: &str) -> String {
    format!("enrichment.{session_id}.")
}

impl CounterKeys {
    pub fn new(session_id: &str, subprocess: &str) -> Self {
        Self {
            prefix: format!("{}{subprocess}", session_prefix(session_id)),
        }
    }

    pub fn key(&self, field: &str) -> String {
        format!("{}.{field}", self.prefix)
    }
}

pub async fn load(
    profiles: &dyn ProfileStore,
    visitor: &str,
    keys: &CounterKeys,
) -> Result<EnrichmentCounters, PersistenceError> {
    let last_fired_at = profiles.counter(visitor, &keys.key("last_fired_at")).await?;
    Ok(EnrichmentCounters {
        turns_observed: profiles.counter(visitor, &keys.key("turns_observed")).await?,
        fire_count: profiles.counter(visitor, &keys.key("fire_count")).await?,
        last_fired_turn: profiles.counter(visitor, &keys.key("last_fired_turn")).await?,
        last_fired_at: (last_fired_at > 0)
            .then(|| Utc.timestamp_opt(last_fired_at as i64, 0).single())
            .flatten(),
    })
}

pub async fn save(
    profiles: &dyn ProfileStore,
    visitor: &str,
    keys: &CounterKeys,
    counters: &EnrichmentCounters,
) -> Result<(), PersistenceError> {
    let last_fired_at = counters
        .last_fired_at
        .map(|t| t.timestamp().max(0) as u64)
        .unwrap_or(0);
    profiles
        .set_counter(visitor, &keys.key("turns_observed"), counters.turns_observed)
        .await?;
    profiles
        .set_counter(visitor, &keys.key("fire_count"), counters.fire_count)
        .await?;
    profiles
        .set_counter(visitor, &keys.key("last_fired_turn"), counters.last_fired_turn)
        .await?;
    profiles
        .set_counter(visitor, &keys.key("last_fired_at"), last_fired_at)
        .await
}

/// Drop every counter of a finished session.
pub async fn clear_session(
    profiles: &dyn ProfileStore,
    visitor: &str,
    session_id: &str,
) -> Result<usize, PersistenceError> {
    profiles
        .clear_counters(visitor, &session_prefix(session_id))
        .await
}
