//! Hydrated visitor signals.
//!
//! Recomputed by the host for every event: persisted facts (pages viewed,
//! visit count) combined with live figures (time on page, scroll depth).
//! The runtime only reads them; it never derives them from browser primitives.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydratedSignals {
    /// Distinct pages viewed across visits
    pub pages_viewed: u32,

    /// Number of visits including this one
    pub visit_count: u32,

    /// Seconds spent on the current page
    pub time_on_page_secs: u64,

    /// Deepest scroll position on the current page, 0.0–1.0
    pub scroll_depth: f32,

    /// Whether the visitor has been here before
    pub is_returning: bool,

    /// Messages the visitor sent this session
    pub messages_sent: u32,

    /// Seconds since the last visitor interaction
    pub idle_secs: u64,

    /// Pointer left the viewport towards the browser chrome
    pub exit_intent: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_path: Option<String>,
}

impl HydratedSignals {
    /// Clamp live figures into their documented ranges.
    pub fn normalized(mut self) -> Self {
        self.scroll_depth = if self.scroll_depth.is_finite() {
            self.scroll_depth.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}
