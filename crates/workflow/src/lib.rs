//! Gated enrichment subprocesses — background refinements of the visitor
//! profile that run off the interactive path.
//!
//! A subprocess fires only when every gate passes:
//!
//! 1. **Session cap**: fewer than `max_per_session` fires so far
//! 2. **Cadence**: the observed turn is a positive multiple of the interval
//!    and has not already fired
//! 3. **Cooldown** (optional): enough time since the last fire
//! 4. **Capability**: the generator is configured
//! 5. **Value check** (optional): the generator answers "yes" to a cheap
//!    yes/no question
//!
//! Counters live in the profile store, not the context store, so they
//! survive compaction and resets.

pub mod builtin;
pub mod counters;
pub mod gate;
pub mod persist;
pub mod runner;
pub mod subprocess;
pub mod summary;
pub mod truncate;

#[cfg(test)]
mod test_helpers;

pub use builtin::{InnerVoice, ProfileRefresh};
pub use counters::clear_session;
pub use gate::{EnrichmentCounters, Gate, GatePolicy, evaluate_gates};
pub use persist::{PersistOutcome, write_with_retry};
pub use runner::{EnrichmentRunner, RunReport};
pub use subprocess::{EnrichmentContext, EnrichmentInput, EnrichmentResult, EnrichmentSubprocess};
pub use summary::record_session_summary;
pub use truncate::truncate_fifo;
