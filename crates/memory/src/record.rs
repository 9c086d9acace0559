//! Per-visitor record shared by the profile store backends.

use concierge_core::profile::{MAX_TOPICS, SessionSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything persisted for one visitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisitorRecord {
    pub profile: Option<String>,
    pub inner_voice: Option<String>,
    pub topics: Vec<String>,
    pub counters: BTreeMap<String, u64>,
    pub sessions: Vec<SessionSummary>,
}

impl VisitorRecord {
    /// Add a topic, ignoring duplicates and dropping the oldest past the cap.
    pub fn add_topic(&mut self, topic: &str) {
        let topic = topic.trim();
        if topic.is_empty() || self.topics.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
            return;
        }
        self.topics.push(topic.to_string());
        if self.topics.len() > MAX_TOPICS {
            let excess = self.topics.len() - MAX_TOPICS;
            self.topics.drain(..excess);
        }
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, key: &str) -> u64 {
        let value = self.counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        *value
    }

    pub fn counters_with_prefix(&self, prefix: &str) -> usize {
        self.counters.keys().filter(|k| k.starts_with(prefix)).count()
    }

    /// Remove every counter under `prefix`, returning how many were removed.
    pub fn clear_counters(&mut self, prefix: &str) -> usize {
        let before = self.counters.len();
        self.counters.retain(|key, _| !key.starts_with(prefix));
        before - self.counters.len()
    }
}
