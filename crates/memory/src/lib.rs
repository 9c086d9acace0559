//! Conversational memory for Concierge.
//!
//! - [`store`]: the immutable, priority-ordered context store
//! - [`region`]: the region registry that orders and protects it
//! - [`compaction`]: rule-based compaction that keeps it bounded
//! - [`in_memory`] / [`file_backend`]: visitor profile stores

pub mod compaction;
pub mod extract;
pub mod file_backend;
pub mod in_memory;
pub mod record;
pub mod region;
pub mod store;

pub use compaction::{
    CompactionConfig, CompactionEngine, CompactionMode, CompactionOutcome, CompactionReport,
    strip_binary_payloads,
};
pub use extract::{Extraction, extract};
pub use file_backend::FileProfileStore;
pub use in_memory::InMemoryProfileStore;
pub use record::VisitorRecord;
pub use region::{RegionConfig, RegionRegistry};
pub use store::ContextStore;
