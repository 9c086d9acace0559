//! The behavioral runtime for one visitor session.
//!
//! Every event follows the same path:
//!
//! 1. **Drain** background enrichment results into the context store
//! 2. **Dispatch** to the current state's handler (passive events only
//!    re-evaluate entry guards)
//! 3. **Validate** any requested transition against the graph
//! 4. **Commit** the new store and state, then run compaction
//! 5. **Tick** the enrichment runner on visitor messages
//!
//! Handlers never fail the session: errors and panics are logged and the
//! session stays where it was.

pub mod graph;
pub mod handler;
pub mod handlers;
pub mod respond;
pub mod scheduler;
pub mod session;

pub use graph::{EntryGuard, TransitionGraph};
pub use handler::{HandlerContext, HandlerOutcome, StateHandler};
pub use handlers::{ConversationHandler, default_handlers};
pub use respond::{Reply, Responder};
pub use scheduler::{Dispatch, Scheduler, TransitionRecord};
pub use session::{Runtime, Session};
