//! Heuristic topic and insight extraction.
//!
//! Pure keyword matching over entry text — no generation call, so it is
//! always available and always deterministic. Topics and insights are ordered
//! by first occurrence (entry order), ties broken by scan order.

use concierge_core::message::{MemoryEntry, Role};
use serde::{Deserialize, Serialize};

pub const MAX_TOPICS: usize = 5;
pub const MAX_INSIGHTS: usize = 3;

/// Longest insight kept, in characters.
const INSIGHT_MAX_CHARS: usize = 120;

/// Topic label → whole-word keywords.
const TOPICS: &[(&str, &[&str])] = &[
    (
        "pricing",
        &["price", "prices", "pricing", "cost", "costs", "plan", "plans", "subscription", "quote", "budget"],
    ),
    (
        "integrations",
        &["api", "integrate", "integration", "integrations", "webhook", "webhooks", "sdk", "plugin"],
    ),
    (
        "security",
        &["security", "secure", "compliance", "gdpr", "soc2", "privacy", "encryption", "sso"],
    ),
    (
        "onboarding",
        &["onboarding", "setup", "install", "migrate", "migration", "import"],
    ),
    ("demo", &["demo", "trial", "walkthrough", "tour", "sandbox"]),
    (
        "support",
        &["support", "help", "bug", "issue", "broken", "error", "outage"],
    ),
    (
        "performance",
        &["performance", "speed", "fast", "slow", "latency", "scale", "scaling"],
    ),
    ("careers", &["job", "jobs", "hiring", "career", "careers", "role"]),
    ("contact", &["contact", "email", "phone", "call", "meeting", "sales"]),
];

/// Phrase → insight label. Matched against visitor text only.
const INSIGHTS: &[(&str, &str)] = &[
    ("i am a ", "Role"),
    ("i'm a ", "Role"),
    ("i work as ", "Role"),
    ("we use ", "Stack"),
    ("we're using ", "Stack"),
    ("we are using ", "Stack"),
    ("looking for ", "Need"),
    ("i need ", "Need"),
    ("we need ", "Need"),
    ("our team ", "Organization"),
    ("my team ", "Organization"),
    ("our company ", "Organization"),
    ("my company ", "Organization"),
];

/// Topics and insights found in a run of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub topics: Vec<String>,
    pub insights: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.insights.is_empty()
    }

    /// `self` first, then `newer`, deduplicated and re-capped.
    pub fn merged_with(&self, newer: &Extraction) -> Extraction {
        let mut out = Extraction::default();
        for topic in self.topics.iter().chain(&newer.topics) {
            push_capped(&mut out.topics, topic, MAX_TOPICS);
        }
        for insight in self.insights.iter().chain(&newer.insights) {
            push_capped(&mut out.insights, insight, MAX_INSIGHTS);
        }
        out
    }

    /// Render as summary text, with placeholders when nothing was found.
    pub fn render(&self, exchanges: usize) -> String {
        let topics = if self.topics.is_empty() {
            "No notable topics yet.".to_string()
        } else {
            self.topics.join(", ")
        };
        let mut out = format!("Conversation summary ({exchanges} earlier messages)\nTopics: {topics}\n");
        if self.insights.is_empty() {
            out.push_str("Insights: none recorded.\n");
        } else {
            out.push_str("Insights:\n");
            for insight in &self.insights {
                out.push_str(&format!("- {insight}\n"));
            }
        }
        out
    }
}

/// Extract topics and insights from entries in chronological order.
pub fn extract<'a>(entries: impl IntoIterator<Item = &'a MemoryEntry>) -> Extraction {
    let mut out = Extraction::default();

    for entry in entries {
        let lower = entry.content.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();

        for (topic, keywords) in TOPICS {
            if words.iter().any(|w| keywords.contains(w)) {
                push_capped(&mut out.topics, topic, MAX_TOPICS);
            }
        }

        if entry.role == Role::User {
            for sentence in sentences(&entry.content) {
                let sentence_lower = format!("{} ", sentence.to_lowercase());
                if let Some((_, label)) = INSIGHTS
                    .iter()
                    .find(|(phrase, _)| sentence_lower.starts_with(phrase) || sentence_lower.contains(&format!(" {phrase}")))
                {
                    let insight = format!("{label}: {}", truncate_chars(sentence, INSIGHT_MAX_CHARS));
                    push_capped(&mut out.insights, &insight, MAX_INSIGHTS);
                }
            }
        }
    }

    out
}

fn push_capped(list: &mut Vec<String>, item: &str, cap: usize) {
    if list.len() < cap && !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}
