//! Visitor profile store trait — persisted facts that outlive a session.
//!
//! Holds the narrative profile, the inner-voice artifact, discovered topics,
//! enrichment counters, and immutable session-summary records. The storage
//! medium is the implementation's concern; the contract is get/set/append
//! with stated size ceilings.

use crate::error::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of topics kept per visitor.
pub const MAX_TOPICS: usize = 20;

/// An immutable record written when a session closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    pub turns: u64,
    pub recorded_at: DateTime<Utc>,
}

/// The core ProfileStore trait.
///
/// Implementations: in-memory (for testing), JSON file per visitor.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    async fn profile(&self, visitor: &str) -> Result<Option<String>, PersistenceError>;

    async fn set_profile(&self, visitor: &str, text: &str) -> Result<(), PersistenceError>;

    async fn inner_voice(&self, visitor: &str) -> Result<Option<String>, PersistenceError>;

    async fn set_inner_voice(&self, visitor: &str, text: &str) -> Result<(), PersistenceError>;

    /// Add a topic; duplicates are ignored and the list is capped at `MAX_TOPICS`
    /// (oldest dropped).
    async fn add_topic(&self, visitor: &str, topic: &str) -> Result<(), PersistenceError>;

    async fn topics(&self, visitor: &str) -> Result<Vec<String>, PersistenceError>;

    /// Read a counter; missing counters read as zero.
    async fn counter(&self, visitor: &str, key: &str) -> Result<u64, PersistenceError>;

    async fn set_counter(&self, visitor: &str, key: &str, value: u64)
    -> Result<(), PersistenceError>;

    /// Increment a counter and return the new value.
    async fn increment_counter(&self, visitor: &str, key: &str) -> Result<u64, PersistenceError>;

    /// Remove every counter whose key starts with `prefix`; returns how many
    /// were removed.
    async fn clear_counters(&self, visitor: &str, prefix: &str) -> Result<usize, PersistenceError>;

    async fn append_session_summary(
        &self,
        visitor: &str,
        summary: SessionSummary,
    ) -> Result<(), PersistenceError>;

    async fn session_summaries(&self, visitor: &str)
    -> Result<Vec<SessionSummary>, PersistenceError>;
}
