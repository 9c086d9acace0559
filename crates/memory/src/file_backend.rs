//! File-based profile store — one JSON document per visitor.
//!
//! Storage location: `~/.concierge/profiles/<visitor>.json` by default.
//!
//! Records are cached in memory after first access and flushed to disk on
//! every mutation. Writes go to a temporary file which is then renamed over
//! the record, so a crash never leaves a half-written profile behind.

use crate::record::VisitorRecord;
use async_trait::async_trait;
use concierge_core::error::PersistenceError;
use concierge_core::profile::{ProfileStore, SessionSummary};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct FileProfileStore {
    dir: PathBuf,
    cache: Arc<RwLock<HashMap<String, VisitorRecord>>>,
    quota_bytes: Option<usize>,
}

impl FileProfileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File profile store opened");
        Self {
            dir,
            cache: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: None,
        }
    }

    /// Reject records whose serialized size exceeds `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a visitor's record. Visitor ids are reduced to a safe file stem.
    pub fn path_for(&self, visitor: &str) -> PathBuf {
        let stem: String = visitor
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let stem = if stem.is_empty() { "anonymous".to_string() } else { stem };
        self.dir.join(format!("{stem}.json"))
    }

    /// Visitor ids with a record on disk.
    pub fn visitors(&self) -> Result<Vec<String>, PersistenceError> {
        let read = match std::fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::Storage(format!("Failed to list profiles: {e}"))),
        };
        let mut visitors: Vec<String> = read
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                (path.extension()? == "json")
                    .then(|| path.file_stem()?.to_str().map(str::to_string))
                    .flatten()
            })
            .collect();
        visitors.sort();
        Ok(visitors)
    }

    /// Load a visitor's record, from cache or disk.
    pub async fn record(&self, visitor: &str) -> Result<VisitorRecord, PersistenceError> {
        if let Some(record) = self.cache.read().await.get(visitor) {
            return Ok(record.clone());
        }
        let mut cache = self.cache.write().await;
        if let Some(record) = cache.get(visitor) {
            return Ok(record.clone());
        }
        let record = self.load_from_disk(visitor)?;
        cache.insert(visitor.to_string(), record.clone());
        Ok(record)
    }

    fn load_from_disk(&self, visitor: &str) -> Result<VisitorRecord, PersistenceError> {
        let path = self.path_for(visitor);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VisitorRecord::default());
            }
            Err(e) => {
                return Err(PersistenceError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| PersistenceError::Corrupted {
            key: visitor.to_string(),
            reason: e.to_string(),
        })
    }

    fn flush(&self, visitor: &str, record: &VisitorRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| PersistenceError::Storage(format!("Failed to serialize profile: {e}")))?;

        if let Some(available) = self.quota_bytes {
            if json.len() > available {
                return Err(PersistenceError::QuotaExceeded {
                    needed: json.len(),
                    available,
                });
            }
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            PersistenceError::Storage(format!("Failed to create profile directory: {e}"))
        })?;

        let path = self.path_for(visitor);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| PersistenceError::Storage(format!("Failed to write profile: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| PersistenceError::Storage(format!("Failed to replace profile: {e}")))?;
        Ok(())
    }

    /// Apply `f` to a copy of the record, flush it, then publish it to the
    /// cache. The cache write lock is held throughout, so updates through one
    /// store never interleave. A failed flush leaves the cached record untouched.
    async fn update<T>(
        &self,
        visitor: &str,
        f: impl FnOnce(&mut VisitorRecord) -> T,
    ) -> Result<T, PersistenceError> {
        let mut cache = self.cache.write().await;
        let mut record = match cache.get(visitor) {
            Some(record) => record.clone(),
            None => match self.load_from_disk(visitor) {
                Ok(record) => record,
                Err(e @ PersistenceError::Corrupted { .. }) => {
                    warn!(visitor, error = %e, "Replacing corrupted profile record");
                    VisitorRecord::default()
                }
                Err(e) => return Err(e),
            },
        };
        let out = f(&mut record);
        self.flush(visitor, &record)?;
        cache.insert(visitor.to_string(), record);
        Ok(out)
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn profile(&self, visitor: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.record(visitor).await?.profile)
    }

    async fn set_profile(&self, visitor: &str, text: &str) -> Result<(), PersistenceError> {
        self.update(visitor, |r| r.profile = Some(text.to_string()))
            .await
    }

    async fn inner_voice(&self, visitor: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.record(visitor).await?.inner_voice)
    }

    async fn set_inner_voice(&self, visitor: &str, text: &str) -> Result<(), PersistenceError> {
        self.update(visitor, |r| r.inner_voice = Some(text.to_string()))
            .await
    }

    async fn add_topic(&self, visitor: &str, topic: &str) -> Result<(), PersistenceError> {
        self.update(visitor, |r| r.add_topic(topic)).await
    }

    async fn topics(&self, visitor: &str) -> Result<Vec<String>, PersistenceError> {
        Ok(self.record(visitor).await?.topics)
    }

    async fn counter(&self, visitor: &str, key: &str) -> Result<u64, PersistenceError> {
        Ok(self.record(visitor).await?.counter(key))
    }

    async fn set_counter(
        &self,
        visitor: &str,
        key: &str,
        value: u64,
    ) -> Result<(), PersistenceError> {
        self.update(visitor, |r| {
            r.counters.insert(key.to_string(), value);
        })
        .await
    }

    async fn increment_counter(&self, visitor: &str, key: &str) -> Result<u64, PersistenceError> {
        self.update(visitor, |r| r.increment(key)).await
    }

    async fn clear_counters(&self, visitor: &str, prefix: &str) -> Result<usize, PersistenceError> {
        if self.record(visitor).await?.counters_with_prefix(prefix) == 0 {
            return Ok(0);
        }
        self.update(visitor, |r| r.clear_counters(prefix)).await
    }

    async fn append_session_summary(
        &self,
        visitor: &str,
        summary: SessionSummary,
    ) -> Result<(), PersistenceError> {
        self.update(visitor, |r| r.sessions.push(summary)).await
    }

    async fn session_summaries(
        &self,
        visitor: &str,
    ) -> Result<Vec<SessionSummary>, PersistenceError> {
        Ok(self.record(visitor).await?.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn profile_persists_across_instances() {
        let dir = TempDir::new().unwrap();

        let store = FileProfileStore::new(dir.path());
        store.set_profile("visitor-1", "Runs a design agency").await.unwrap();
        store.add_topic("visitor-1", "pricing").await.unwrap();

        let content = std::fs::read_to_string(store.path_for("visitor-1")).unwrap();
        assert!(content.contains("Runs a design agency"));

        let reopened = FileProfileStore::new(dir.path());
        assert_eq!(
            reopened.profile("visitor-1").await.unwrap().as_deref(),
            Some("Runs a design agency")
        );
        assert_eq!(reopened.topics("visitor-1").await.unwrap(), vec!["pricing"]);
    }

    #[tokio::test]
    async fn missing_directory_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path().join("not-yet"));
        assert!(store.profile("v").await.unwrap().is_none());
        assert_eq!(store.counter("v", "fires").await.unwrap(), 0);
        assert!(store.visitors().unwrap().is_empty());
    }

    #[tokio::test]
    async fn visitor_ids_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        let path = store.path_for("../etc/passwd");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(store.path_for("").file_name().unwrap(), "anonymous.json");
    }

    #[tokio::test]
    async fn corrupted_record_reports_then_recovers_on_write() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        std::fs::write(store.path_for("v"), "not json").unwrap();

        assert!(matches!(
            store.profile("v").await,
            Err(PersistenceError::Corrupted { .. })
        ));

        store.set_profile("v", "fresh start").await.unwrap();
        assert_eq!(store.profile("v").await.unwrap().as_deref(), Some("fresh start"));
    }

    #[tokio::test]
    async fn quota_failure_leaves_previous_value() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path()).with_quota(200);
        store.set_profile("v", "short").await.unwrap();

        let err = store.set_profile("v", &"x".repeat(500)).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(store.profile("v").await.unwrap().as_deref(), Some("short"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileProfileStore::new(dir.path()));

        let writers: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set_counter("v", &format!("enrichment.s{i}.fire_count"), 1)
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let reopened = FileProfileStore::new(dir.path());
        assert_eq!(reopened.record("v").await.unwrap().counters.len(), 50);
    }

    #[tokio::test]
    async fn clearing_counters_only_touches_the_prefix() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        store.set_counter("v", "enrichment.s1.fire_count", 2).await.unwrap();
        store.set_counter("v", "enrichment.s1.turns_observed", 5).await.unwrap();
        store.set_counter("v", "enrichment.s2.fire_count", 1).await.unwrap();

        assert_eq!(store.clear_counters("v", "enrichment.s1.").await.unwrap(), 2);
        assert_eq!(store.clear_counters("v", "enrichment.s1.").await.unwrap(), 0);

        let reopened = FileProfileStore::new(dir.path());
        assert_eq!(reopened.counter("v", "enrichment.s1.fire_count").await.unwrap(), 0);
        assert_eq!(reopened.counter("v", "enrichment.s2.fire_count").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lists_visitors() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        store.increment_counter("b", "fires").await.unwrap();
        store.increment_counter("a", "fires").await.unwrap();
        assert_eq!(store.visitors().unwrap(), vec!["a", "b"]);
    }
}
