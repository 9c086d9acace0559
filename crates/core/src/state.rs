//! Behavioral states — the closed set the scheduler moves between.

use serde::{Deserialize, Serialize};

/// A behavioral mode of the agent for one visitor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorState {
    /// First contact in a session.
    Greeting,
    /// Visitor is browsing with some interest but has not talked yet.
    Curious,
    /// Active conversation.
    Engaged,
    /// Visitor shows buying or sign-up intent.
    Ready,
    /// Known visitor coming back.
    Returning,
    /// Visitor went quiet.
    Dormant,
    /// Visitor is about to leave.
    Exiting,
    /// Guided walkthrough (specialty mode, entered on request only).
    Tour,
}

impl BehaviorState {
    pub const ALL: [BehaviorState; 8] = [
        Self::Greeting,
        Self::Curious,
        Self::Engaged,
        Self::Ready,
        Self::Returning,
        Self::Dormant,
        Self::Exiting,
        Self::Tour,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Curious => "curious",
            Self::Engaged => "engaged",
            Self::Ready => "ready",
            Self::Returning => "returning",
            Self::Dormant => "dormant",
            Self::Exiting => "exiting",
            Self::Tour => "tour",
        }
    }
}

impl std::fmt::Display for BehaviorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BehaviorState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown behavior state: {s}"))
    }
}
