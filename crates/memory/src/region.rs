//! Region registry — named partitions of conversational memory.
//!
//! Each region carries a presentation priority (lower = earlier), an optional
//! capacity, and its compaction policy. `config_for` never fails: unknown
//! regions get a compressible, non-persistent default with the lowest priority.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SYSTEM: &str = "system";
pub const VISITOR: &str = "visitor";
pub const PROFILE: &str = "profile";
pub const INNER_VOICE: &str = "inner_voice";
pub const SUMMARY: &str = "summary";
pub const ENRICHMENT: &str = "enrichment";
pub const DIRECTIVE: &str = "directive";
pub const RECENT: &str = "recent";

/// Priority given to regions the registry does not know.
pub const FALLBACK_PRIORITY: u32 = 1000;

/// Capacity given to regions the registry does not know.
pub const FALLBACK_MAX_ENTRIES: usize = 200;

/// Configuration of a single region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    pub compressible: bool,
    pub persistent: bool,
}

impl RegionConfig {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            max_entries: None,
            compressible: true,
            persistent: false,
        }
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Kept verbatim through compaction.
    pub fn pinned(mut self) -> Self {
        self.compressible = false;
        self.persistent = true;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// The config handed out for regions nobody registered.
    pub fn fallback(name: impl Into<String>) -> Self {
        Self::new(name, FALLBACK_PRIORITY).max_entries(FALLBACK_MAX_ENTRIES)
    }

    /// Persistent and not compressible: survives compaction verbatim.
    pub fn is_pinned(&self) -> bool {
        self.persistent && !self.compressible
    }
}

/// Read-only lookup table of region configs.
///
/// Built once before sessions start and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: HashMap<String, RegionConfig>,
}

impl RegionRegistry {
    /// An empty registry: every region resolves to the fallback config.
    pub fn empty() -> Self {
        Self {
            regions: HashMap::new(),
        }
    }

    /// The built-in region table.
    pub fn builtin() -> Self {
        Self::empty()
            .with_region(RegionConfig::new(SYSTEM, 0).max_entries(4).pinned())
            .with_region(RegionConfig::new(VISITOR, 1).max_entries(3).pinned())
            .with_region(RegionConfig::new(PROFILE, 2).max_entries(1).pinned())
            .with_region(RegionConfig::new(INNER_VOICE, 3).max_entries(1).pinned())
            .with_region(RegionConfig::new(SUMMARY, 4).max_entries(1).persistent(true))
            .with_region(RegionConfig::new(ENRICHMENT, 5).max_entries(2))
            .with_region(RegionConfig::new(DIRECTIVE, 6).max_entries(1))
            .with_region(RegionConfig::new(RECENT, 90))
    }

    /// Add or replace a region (builder style).
    pub fn with_region(mut self, config: RegionConfig) -> Self {
        self.regions.insert(config.name.clone(), config);
        self
    }

    /// Look up a region; never fails.
    pub fn config_for(&self, region: &str) -> RegionConfig {
        self.regions
            .get(region)
            .cloned()
            .unwrap_or_else(|| RegionConfig::fallback(region))
    }

    pub fn is_registered(&self, region: &str) -> bool {
        self.regions.contains_key(region)
    }

    /// All registered regions by ascending priority.
    pub fn regions(&self) -> Vec<&RegionConfig> {
        let mut all: Vec<&RegionConfig> = self.regions.values().collect();
        all.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        all
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_region_gets_fallback() {
        let registry = RegionRegistry::builtin();
        let config = registry.config_for("scratch");
        assert_eq!(config.name, "scratch");
        assert_eq!(config.priority, FALLBACK_PRIORITY);
        assert!(config.compressible);
        assert!(!config.persistent);
        assert_eq!(config.max_entries, Some(FALLBACK_MAX_ENTRIES));
        assert!(!registry.is_registered("scratch"));
    }

    #[test]
    fn builtin_visitor_precedes_profile() {
        let registry = RegionRegistry::builtin();
        assert!(registry.config_for(VISITOR).priority < registry.config_for(PROFILE).priority);
        assert!(registry.config_for(PROFILE).is_pinned());
        assert!(!registry.config_for(SUMMARY).is_pinned());
    }

    #[test]
    fn regions_sorted_by_priority() {
        let registry = RegionRegistry::builtin();
        let names: Vec<&str> = registry
            .regions()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names.first(), Some(&SYSTEM));
        assert_eq!(names.last(), Some(&RECENT));
    }

    #[test]
    fn custom_region_overrides_builtin() {
        let registry =
            RegionRegistry::builtin().with_region(RegionConfig::new(PROFILE, 50).max_entries(2));
        let config = registry.config_for(PROFILE);
        assert_eq!(config.priority, 50);
        assert!(!config.is_pinned());
    }
}
