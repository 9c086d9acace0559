//! Memory entry domain types.
//!
//! A `MemoryEntry` is the value object held by the context store:
//! visitor speaks → handler appends an entry → generator sees the ordered view
//! → the reply is appended as another entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of an entry's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runtime-authored instructions and context
    System,
    /// The visitor
    User,
    /// The agent
    Assistant,
}

/// What an entry is, as an explicit field rather than a content prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A conversational message.
    #[default]
    Message,
    /// A compaction summary.
    Summary,
    /// A state directive steering the next reply.
    Directive,
    /// Output of a background enrichment subprocess.
    Enrichment,
}

/// A single immutable entry in conversational memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique entry ID
    pub id: String,

    /// Who authored this entry
    pub role: Role,

    /// The text content
    pub content: String,

    /// Region this entry belongs to (None = plain conversation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Speaker label shown to the generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Assigned by the store on append when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub kind: EntryKind,

    /// Internal entries are never shown to the visitor
    #[serde(default)]
    pub internal: bool,

    /// Open metadata (captions, attachments, enrichment provenance, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryEntry {
    /// Create an entry with the given role and no timestamp.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            region: None,
            name: None,
            timestamp: None,
            kind: EntryKind::Message,
            internal: false,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a visitor message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an agent message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system entry.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark the entry as internal (not visitor-facing).
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Whether this entry is a visitor/agent message (one half of an exchange).
    pub fn is_exchange(&self) -> bool {
        self.kind == EntryKind::Message && matches!(self.role, Role::User | Role::Assistant)
    }

    /// Whether this entry is tagged with the given region.
    pub fn is_in(&self, region: &str) -> bool {
        self.region.as_deref() == Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_entry() {
        let entry = MemoryEntry::user("Hello there");
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.content, "Hello there");
        assert!(entry.timestamp.is_none());
        assert!(entry.is_exchange());
    }

    #[test]
    fn builder_sets_structured_fields() {
        let entry = MemoryEntry::system("be brief")
            .in_region("directive")
            .with_kind(EntryKind::Directive)
            .internal();
        assert!(entry.is_in("directive"));
        assert!(entry.internal);
        assert!(!entry.is_exchange());
    }

    #[test]
    fn serialization_omits_empty_fields() {
        let entry = MemoryEntry::assistant("Hi!");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        assert!(!json.contains("region"));
        assert!(!json.contains("metadata"));
        let back: MemoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
