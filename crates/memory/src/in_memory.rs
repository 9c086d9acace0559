//! In-memory profile store — useful for testing and ephemeral sessions.

use crate::record::VisitorRecord;
use async_trait::async_trait;
use concierge_core::error::PersistenceError;
use concierge_core::profile::{ProfileStore, SessionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A profile store that keeps visitor records in a map.
///
/// An optional byte quota makes text writes fail with `QuotaExceeded`, the
/// way a browser's storage does when full.
pub struct InMemoryProfileStore {
    records: Arc<RwLock<HashMap<String, VisitorRecord>>>,
    quota_bytes: Option<usize>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: None,
        }
    }

    /// Reject text values larger than `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// A copy of a visitor's full record.
    pub async fn record(&self, visitor: &str) -> VisitorRecord {
        self.records
            .read()
            .await
            .get(visitor)
            .cloned()
            .unwrap_or_default()
    }

    fn check_quota(&self, text: &str) -> Result<(), PersistenceError> {
        match self.quota_bytes {
            Some(available) if text.len() > available => Err(PersistenceError::QuotaExceeded {
                needed: text.len(),
                available,
            }),
            _ => Ok(()),
        }
    }

    async fn update<T>(&self, visitor: &str, f: impl FnOnce(&mut VisitorRecord) -> T) -> T {
        let mut records = self.records.write().await;
        f(records.entry(visitor.to_string()).or_default())
    }
}

impl Default for InMemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn profile(&self, visitor: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.record(visitor).await.profile)
    }

    async fn set_profile(&self, visitor: &str, text: &str) -> Result<(), PersistenceError> {
        self.check_quota(text)?;
        self.update(visitor, |r| r.profile = Some(text.to_string()))
            .await;
        Ok(())
    }

    async fn inner_voice(&self, visitor: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.record(visitor).await.inner_voice)
    }

    async fn set_inner_voice(&self, visitor: &str, text: &str) -> Result<(), PersistenceError> {
        self.check_quota(text)?;
        self.update(visitor, |r| r.inner_voice = Some(text.to_string()))
            .await;
        Ok(())
    }

    async fn add_topic(&self, visitor: &str, topic: &str) -> Result<(), PersistenceError> {
        self.update(visitor, |r| r.add_topic(topic)).await;
        Ok(())
    }

    async fn topics(&self, visitor: &str) -> Result<Vec<String>, PersistenceError> {
        Ok(self.record(visitor).await.topics)
    }

    async fn counter(&self, visitor: &str, key: &str) -> Result<u64, PersistenceError> {
        Ok(self.record(visitor).await.counter(key))
    }

    async fn set_counter(
        &self,
        visitor: &str,
        key: &str,
        value: u64,
    ) -> Result<(), PersistenceError> {
        self.update(visitor, |r| r.counters.insert(key.to_string(), value))
            .await;
        Ok(())
    }

    async fn increment_counter(&self, visitor: &str, key: &str) -> Result<u64, PersistenceError> {
        Ok(self.update(visitor, |r| r.increment(key)).await)
    }

    async fn clear_counters(&self, visitor: &str, prefix: &str) -> Result<usize, PersistenceError> {
        Ok(self.update(visitor, |r| r.clear_counters(prefix)).await)
    }

    async fn append_session_summary(
        &self,
        visitor: &str,
        summary: SessionSummary,
    ) -> Result<(), PersistenceError> {
        self.check_quota(&summary.summary)?;
        self.update(visitor, |r| r.sessions.push(summary)).await;
        Ok(())
    }

    async fn session_summaries(
        &self,
        visitor: &str,
    ) -> Result<Vec<SessionSummary>, PersistenceError> {
        Ok(self.record(visitor).await.sessions)
    }
}
