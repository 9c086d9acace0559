//! Context store — immutable, append-only conversational memory.
//!
//! Every mutating operation returns a new `ContextStore`; the receiver and
//! every snapshot taken from it stay valid and unchanged. Entries are shared
//! between snapshots behind `Arc`s, so a new snapshot costs one vector of
//! pointers, not a deep copy.
//!
//! The log is kept in insertion order. `ordered_view` projects it into
//! presentation order: region buckets by ascending priority (ties broken by
//! declaration order), insertion order inside a bucket, untagged entries last.

use crate::region::{RegionConfig, RegionRegistry};
use chrono::Utc;
use concierge_core::generation::GenerationMessage;
use concierge_core::message::{MemoryEntry, Role};
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ContextStore {
    speaker_label: Arc<str>,
    entries: Arc<[Arc<MemoryEntry>]>,
    /// Regions in declaration order, with the config in force for this store
    declared: Arc<[RegionConfig]>,
    registry: Arc<RegionRegistry>,
}

impl ContextStore {
    /// Create an empty store at session start.
    pub fn new(speaker_label: impl Into<String>, registry: Arc<RegionRegistry>) -> Self {
        Self {
            speaker_label: Arc::from(speaker_label.into()),
            entries: Arc::from(Vec::new()),
            declared: Arc::from(Vec::new()),
            registry,
        }
    }

    /// Create an empty store with the built-in region table.
    pub fn with_builtin_regions(speaker_label: impl Into<String>) -> Self {
        Self::new(speaker_label, Arc::new(RegionRegistry::builtin()))
    }

    // ── Reads ──

    pub fn speaker_label(&self) -> &str {
        &self.speaker_label
    }

    pub fn registry(&self) -> &Arc<RegionRegistry> {
        &self.registry
    }

    /// Entries in insertion (chronological) order.
    pub fn entries(&self) -> &[Arc<MemoryEntry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declared regions in declaration order.
    pub fn declared_regions(&self) -> &[RegionConfig] {
        &self.declared
    }

    pub fn is_declared(&self, region: &str) -> bool {
        self.declared.iter().any(|r| r.name == region)
    }

    /// The config in force for a region: a per-store override if one was
    /// supplied to `set_region`, otherwise the registry's.
    pub fn region_config(&self, region: &str) -> RegionConfig {
        self.declared
            .iter()
            .find(|r| r.name == region)
            .cloned()
            .unwrap_or_else(|| self.registry.config_for(region))
    }

    /// Entries tagged with `region`, in insertion order.
    pub fn region(&self, region: &str) -> Vec<Arc<MemoryEntry>> {
        self.entries
            .iter()
            .filter(|e| e.is_in(region))
            .cloned()
            .collect()
    }

    /// Number of visitor/agent message entries.
    pub fn exchange_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_exchange()).count()
    }

    /// The most recent entry with the given role.
    pub fn last_by_role(&self, role: Role) -> Option<Arc<MemoryEntry>> {
        self.entries.iter().rev().find(|e| e.role == role).cloned()
    }

    /// Entries in presentation order.
    pub fn ordered_view(&self) -> Vec<Arc<MemoryEntry>> {
        let mut ranked: Vec<&RegionConfig> = self.declared.iter().collect();
        // Stable sort keeps declaration order for equal priorities.
        ranked.sort_by_key(|r| r.priority);

        let bucket_of = |entry: &MemoryEntry| -> usize {
            entry
                .region
                .as_deref()
                .and_then(|name| ranked.iter().position(|r| r.name == name))
                .unwrap_or(usize::MAX)
        };

        let mut view: Vec<(usize, usize, &Arc<MemoryEntry>)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (bucket_of(e), i, e))
            .collect();
        view.sort_by_key(|(bucket, index, _)| (*bucket, *index));
        view.into_iter().map(|(_, _, e)| e.clone()).collect()
    }

    /// The ordered view as generator input. Agent entries without a speaker
    /// label get the store's label.
    pub fn to_messages(&self) -> Vec<GenerationMessage> {
        self.ordered_view()
            .iter()
            .map(|e| GenerationMessage {
                role: e.role,
                content: e.content.clone(),
                name: e.name.clone().or_else(|| {
                    (e.role == Role::Assistant).then(|| self.speaker_label.to_string())
                }),
            })
            .collect()
    }

    // ── Mutations (all return a new store) ──

    /// Append an entry, stamping it if it has no timestamp.
    pub fn append(&self, entry: MemoryEntry) -> Self {
        let entry = stamp(entry);
        let declared = match entry.region.as_deref() {
            Some(region) if !self.is_declared(region) => {
                self.declare(self.registry.config_for(region))
            }
            _ => self.declared.clone(),
        };
        let mut entries = self.entries.to_vec();
        entries.push(Arc::new(entry));
        self.derive(entries, declared)
    }

    /// Replace the contents of a region with a single system entry holding
    /// `text`. Empty text clears the region but still declares it.
    pub fn set_region(&self, name: &str, text: &str, config: Option<RegionConfig>) -> Self {
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![MemoryEntry::system(text)]
        };
        self.set_region_entries(name, content, config)
    }

    /// Replace every entry tagged `name` with `content`, declaring the region
    /// if new. A supplied config overrides the registry for this store and
    /// its descendants.
    pub fn set_region_entries(
        &self,
        name: &str,
        content: Vec<MemoryEntry>,
        config: Option<RegionConfig>,
    ) -> Self {
        let config = match config {
            Some(mut config) => {
                config.name = name.to_string();
                config
            }
            None => self.region_config(name),
        };
        let declared = self.declare(config);

        let mut entries: Vec<Arc<MemoryEntry>> = self
            .entries
            .iter()
            .filter(|e| !e.is_in(name))
            .cloned()
            .collect();
        entries.extend(
            content
                .into_iter()
                .map(|e| Arc::new(stamp(e.in_region(name)))),
        );
        self.derive(entries, declared)
    }

    /// Remove the named regions and their entries.
    pub fn drop_regions(&self, names: &[&str]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|e| !e.region.as_deref().is_some_and(|r| names.contains(&r)))
            .cloned()
            .collect();
        let declared: Vec<RegionConfig> = self
            .declared
            .iter()
            .filter(|r| !names.contains(&r.name.as_str()))
            .cloned()
            .collect();
        self.derive(entries, Arc::from(declared))
    }

    /// Keep only the named regions. Untagged entries belong to no region and
    /// are kept.
    pub fn keep_only_regions(&self, names: &[&str]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|e| e.region.as_deref().is_none_or(|r| names.contains(&r)))
            .cloned()
            .collect();
        let declared: Vec<RegionConfig> = self
            .declared
            .iter()
            .filter(|r| names.contains(&r.name.as_str()))
            .cloned()
            .collect();
        self.derive(entries, Arc::from(declared))
    }

    /// A store holding the chronological sub-range `range` (clamped).
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.entries.len());
        let start = range.start.min(end);
        self.derive(self.entries[start..end].to_vec(), self.declared.clone())
    }

    /// A store holding the entries that satisfy `predicate`.
    pub fn filter(&self, predicate: impl Fn(&MemoryEntry) -> bool) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect();
        self.derive(entries, self.declared.clone())
    }

    /// A store with every entry transformed by `f`. Regions introduced by
    /// the transform are declared.
    pub fn map(&self, f: impl Fn(&MemoryEntry) -> MemoryEntry) -> Self {
        let mut declared = self.declared.to_vec();
        let entries = self
            .entries
            .iter()
            .map(|e| {
                let mapped = stamp(f(e));
                if let Some(region) = mapped.region.as_deref() {
                    if !declared.iter().any(|r| r.name == region) {
                        declared.push(self.registry.config_for(region));
                    }
                }
                Arc::new(mapped)
            })
            .collect();
        self.derive(entries, Arc::from(declared))
    }

    /// Rebuild from an explicit entry list, keeping label, registry, and
    /// declarations. Used by compaction.
    pub fn with_entries(&self, entries: Vec<MemoryEntry>) -> Self {
        let mut store = self.derive(Vec::new(), self.declared.clone());
        for entry in entries {
            store = store.append(entry);
        }
        store
    }

    // ── Internals ──

    fn derive(&self, entries: Vec<Arc<MemoryEntry>>, declared: Arc<[RegionConfig]>) -> Self {
        Self {
            speaker_label: self.speaker_label.clone(),
            entries: Arc::from(entries),
            declared,
            registry: self.registry.clone(),
        }
    }

    /// Declarations with `config` added, or replacing an existing one in place.
    fn declare(&self, config: RegionConfig) -> Arc<[RegionConfig]> {
        let mut declared = self.declared.to_vec();
        match declared.iter_mut().find(|r| r.name == config.name) {
            Some(existing) => *existing = config,
            None => declared.push(config),
        }
        Arc::from(declared)
    }
}

fn stamp(mut entry: MemoryEntry) -> MemoryEntry {
    if entry.timestamp.is_none() {
        entry.timestamp = Some(Utc::now());
    }
    entry
}
