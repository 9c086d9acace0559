//! # Concierge Core
//!
//! Domain types, capability traits, and error definitions for the Concierge
//! behavioral runtime. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (generation model, UI actions, persisted
//! visitor profile) is defined as a trait here. Implementations live in their
//! respective crates or in the host application. This enables:
//! - Swapping implementations per deployment
//! - Easy testing with scripted/recording stand-ins
//! - Clean dependency graph (all crates depend inward on core)

pub mod actions;
pub mod error;
pub mod event;
pub mod generation;
pub mod message;
pub mod profile;
pub mod signals;
pub mod state;
pub mod testing;

// Re-export key types at crate root for ergonomics
pub use actions::{Actions, ScheduledEvent, UiEffect, Utterance};
pub use error::{
    CapabilityError, Error, HandlerError, PersistenceError, Result, TransitionError,
};
pub use event::{Event, EventBus, EventKind, EventSource, RuntimeEvent};
pub use generation::{
    FragmentReceiver, Generation, GenerationMessage, GenerationOptions, GenerationRequest,
    Generator, generate_text,
};
pub use message::{EntryKind, MemoryEntry, Role};
pub use profile::{ProfileStore, SessionSummary};
pub use signals::HydratedSignals;
pub use state::BehaviorState;
