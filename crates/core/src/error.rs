//! Error types for the Concierge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use crate::state::BehaviorState;
use thiserror::Error;

/// The top-level error type for all Concierge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Scheduler errors ---
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    // --- Generation capability errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Visitor profile persistence ---
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A requested transition is not an edge of the adjacency table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to} ({reason})")]
pub struct TransitionError {
    pub from: BehaviorState,
    pub to: BehaviorState,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("handler for {state} failed on {event}: {message}")]
    Failed {
        state: BehaviorState,
        event: String,
        message: String,
    },

    #[error("handler for {state} panicked on {event}: {message}")]
    Panicked {
        state: BehaviorState,
        event: String,
        message: String,
    },

    #[error("no handler registered for {0}")]
    Missing(BehaviorState),
}

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Generation request rejected: {0}")]
    Rejected(String),

    #[error("Generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed generation output: {0}")]
    Malformed(String),

    #[error("Generation stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Generation cancelled by consumer")]
    Cancelled,

    #[error("Capability not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("Storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted record for {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

impl PersistenceError {
    /// Whether trimming the payload and retrying once can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}
