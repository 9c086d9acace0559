//! Compaction engine — keeps the context store bounded.
//!
//! When a store grows past its ceiling, the engine rebuilds it as:
//!
//! 1. **Pinned entries** (persistent and non-compressible regions), verbatim,
//!    each region capped to its `max_entries` keeping the most recent.
//! 2. **One summary entry** with heuristically extracted topics and insights,
//!    carrying forward whatever the previous summary recorded.
//! 3. **The most recent exchanges**, verbatim, re-tagged `recent`.
//!
//! Between full compactions, a cheaper summary-only refresh rewrites the
//! summary region without trimming once enough new exchanges accumulate.
//!
//! Compaction never fails and never calls the generator.

use crate::extract::{Extraction, extract};
use crate::region::{RECENT, SUMMARY};
use crate::store::ContextStore;
use chrono::Utc;
use concierge_core::message::{EntryKind, MemoryEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Strings at least this long that look like base64 are treated as binary.
const BINARY_PAYLOAD_MIN_CHARS: usize = 1024;

/// Metadata keys kept from a stripped attachment object.
const CAPTION_KEYS: &[&str] = &["caption", "alt", "title", "name", "mime_type"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Entry count above which a full compaction runs
    pub ceiling: usize,
    /// Upper bound on entries after compaction
    pub target: usize,
    /// Most recent exchanges kept verbatim
    pub preserve_recent: usize,
    /// New exchanges after which the summary is refreshed in place
    pub refresh_after_exchanges: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            ceiling: 50,
            target: 25,
            preserve_recent: 10,
            refresh_after_exchanges: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionMode {
    Full,
    SummaryRefresh,
}

impl CompactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::SummaryRefresh => "summary_refresh",
        }
    }
}

/// What a compaction did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionReport {
    pub mode: CompactionMode,
    pub before: usize,
    pub after: usize,
    pub persistent_kept: usize,
    pub recent_kept: usize,
    pub topics: Vec<String>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub store: ContextStore,
    pub report: CompactionReport,
}

/// Per-session compaction engine.
///
/// Stateless apart from the exchange baseline used to decide when a summary
/// refresh is due.
#[derive(Debug, Clone)]
pub struct CompactionEngine {
    config: CompactionConfig,
    /// Untagged exchanges present at the last summary refresh
    refresh_baseline: usize,
}

impl CompactionEngine {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            refresh_baseline: 0,
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// True when the store holds more entries than the ceiling.
    pub fn needs_compaction(&self, store: &ContextStore) -> bool {
        store.len() > self.config.ceiling
    }

    /// Exchanges appended since the last compaction or summary refresh.
    pub fn exchanges_since_last(&self, store: &ContextStore) -> usize {
        fresh_exchanges(store).saturating_sub(self.refresh_baseline)
    }

    /// Run whichever compaction is due, if any.
    pub fn maybe_compact(&mut self, store: &ContextStore) -> Option<CompactionOutcome> {
        if self.needs_compaction(store) {
            let outcome = self.compact(store);
            self.refresh_baseline = 0;
            return Some(outcome);
        }

        let since = self.exchanges_since_last(store);
        if self.config.refresh_after_exchanges > 0 && since >= self.config.refresh_after_exchanges
        {
            let outcome = self.refresh_summary(store);
            self.refresh_baseline = fresh_exchanges(&outcome.store);
            return Some(outcome);
        }

        None
    }

    /// Full compaction. Pure: the input store is untouched.
    pub fn compact(&self, store: &ContextStore) -> CompactionOutcome {
        let before = store.len();
        let (pinned, candidates) = partition(store);
        let pinned = cap_pinned(store, pinned);

        let extraction = summarize(&candidates);
        let summarized = candidates.iter().filter(|e| e.is_exchange()).count();

        let exchanges: Vec<&MemoryEntry> = candidates
            .iter()
            .filter(|e| e.is_exchange())
            .map(|e| &**e)
            .collect();
        let budget = self
            .config
            .target
            .saturating_sub(pinned.len() + 1)
            .min(self.config.preserve_recent);
        let recent = &exchanges[exchanges.len().saturating_sub(budget)..];

        let mut rebuilt: Vec<MemoryEntry> = pinned.iter().map(|e| (**e).clone()).collect();
        rebuilt.push(summary_entry(&extraction, summarized));
        rebuilt.extend(recent.iter().map(|e| {
            let mut kept = (*e).clone().in_region(RECENT);
            kept.metadata = strip_binary_payloads(&kept.metadata);
            kept
        }));

        let compacted = store.with_entries(rebuilt);
        let report = CompactionReport {
            mode: CompactionMode::Full,
            before,
            after: compacted.len(),
            persistent_kept: pinned.len(),
            recent_kept: recent.len(),
            topics: extraction.topics,
            insights: extraction.insights,
        };

        info!(
            before = report.before,
            after = report.after,
            pinned = report.persistent_kept,
            recent = report.recent_kept,
            "Context store compacted"
        );

        CompactionOutcome {
            store: compacted,
            report,
        }
    }

    /// Rewrite the summary region from the current candidates without
    /// trimming anything else.
    pub fn refresh_summary(&self, store: &ContextStore) -> CompactionOutcome {
        let (_, candidates) = partition(store);
        let extraction = summarize(&candidates);
        let summarized = candidates.iter().filter(|e| e.is_exchange()).count();

        let refreshed = store.set_region_entries(
            SUMMARY,
            vec![summary_entry(&extraction, summarized)],
            None,
        );

        debug!(topics = extraction.topics.len(), "Summary refreshed in place");

        CompactionOutcome {
            report: CompactionReport {
                mode: CompactionMode::SummaryRefresh,
                before: store.len(),
                after: refreshed.len(),
                persistent_kept: 0,
                recent_kept: 0,
                topics: extraction.topics,
                insights: extraction.insights,
            },
            store: refreshed,
        }
    }
}

impl Default for CompactionEngine {
    fn default() -> Self {
        Self::new(CompactionConfig::default())
    }
}

/// Split into (pinned, candidates). Earlier summaries are neither: their
/// content is carried forward through `summarize`.
fn partition(store: &ContextStore) -> (Vec<Arc<MemoryEntry>>, Vec<Arc<MemoryEntry>>) {
    let mut pinned = Vec::new();
    let mut candidates = Vec::new();
    for entry in store.entries() {
        match entry.region.as_deref() {
            Some(region) if store.region_config(region).is_pinned() => pinned.push(entry.clone()),
            _ => candidates.push(entry.clone()),
        }
    }
    (pinned, candidates)
}

/// Keep at most `max_entries` per pinned region, most recent first,
/// preserving chronological order in the result.
fn cap_pinned(store: &ContextStore, pinned: Vec<Arc<MemoryEntry>>) -> Vec<Arc<MemoryEntry>> {
    let mut totals: HashMap<&str, usize> = HashMap::new();
    for entry in &pinned {
        *totals.entry(entry.region.as_deref().unwrap_or_default()).or_default() += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(pinned.len());
    for entry in &pinned {
        let region = entry.region.as_deref().unwrap_or_default();
        let total = totals.get(region).copied().unwrap_or_default();
        let cap = store.region_config(region).max_entries.unwrap_or(usize::MAX);
        let index = seen.entry(region.to_string()).or_default();
        if *index >= total.saturating_sub(cap) {
            kept.push(entry.clone());
        }
        *index += 1;
    }
    kept
}

/// Prior summary findings first, then whatever the live candidates add.
fn summarize(candidates: &[Arc<MemoryEntry>]) -> Extraction {
    let (summaries, live): (Vec<&Arc<MemoryEntry>>, Vec<&Arc<MemoryEntry>>) = candidates
        .iter()
        .partition(|e| e.kind == EntryKind::Summary);

    let prior = summaries
        .iter()
        .map(|e| Extraction {
            topics: string_list(e.metadata.get("topics")),
            insights: string_list(e.metadata.get("insights")),
        })
        .fold(Extraction::default(), |acc, e| acc.merged_with(&e));

    prior.merged_with(&extract(live.into_iter().map(|e| &**e)))
}

fn summary_entry(extraction: &Extraction, summarized: usize) -> MemoryEntry {
    MemoryEntry::system(extraction.render(summarized))
        .in_region(SUMMARY)
        .with_kind(EntryKind::Summary)
        .internal()
        .with_metadata("topics", serde_json::json!(extraction.topics))
        .with_metadata("insights", serde_json::json!(extraction.insights))
        .with_metadata("compacted_at", serde_json::json!(Utc::now().to_rfc3339()))
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Drop large binary payloads from metadata, keeping textual captions.
pub fn strip_binary_payloads(
    metadata: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    for (key, value) in metadata {
        match value {
            serde_json::Value::String(s) if is_binary_payload(s) => {
                out.insert(format!("{key}_omitted"), serde_json::Value::Bool(true));
            }
            serde_json::Value::Object(object)
                if object
                    .get("data")
                    .and_then(|d| d.as_str())
                    .is_some_and(is_binary_payload) =>
            {
                let mut kept: serde_json::Map<String, serde_json::Value> = object
                    .iter()
                    .filter(|(k, v)| CAPTION_KEYS.contains(&k.as_str()) && v.is_string())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                kept.insert("omitted".into(), serde_json::Value::Bool(true));
                out.insert(key.clone(), serde_json::Value::Object(kept));
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    out
}

fn is_binary_payload(s: &str) -> bool {
    if s.starts_with("data:") {
        return true;
    }
    s.len() >= BINARY_PAYLOAD_MIN_CHARS
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'\n' | b'\r'))
}

fn fresh_exchanges(store: &ContextStore) -> usize {
    store
        .entries()
        .iter()
        .filter(|e| e.is_exchange() && e.region.is_none())
        .count()
}
