//! Shared test helpers for workflow tests.

use crate::subprocess::EnrichmentContext;
use concierge_core::generation::{GenerationOptions, Generator};
use concierge_core::profile::ProfileStore;
use std::sync::Arc;
use std::time::Duration;

/// An enrichment context with default ceilings and a 20s timeout.
pub fn context_with(
    generator: Arc<dyn Generator>,
    profiles: Arc<dyn ProfileStore>,
) -> EnrichmentContext {
    EnrichmentContext {
        generator: Some(generator),
        profiles,
        timeout: Duration::from_secs(20),
        options: GenerationOptions::default(),
        max_profile_chars: 2000,
        max_inner_voice_chars: 1000,
    }
}
