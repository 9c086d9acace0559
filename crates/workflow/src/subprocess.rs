//! The enrichment subprocess contract.

use crate::gate::GatePolicy;
use async_trait::async_trait;
use concierge_core::generation::{GenerationMessage, GenerationOptions, GenerationRequest, Generator};
use concierge_core::message::Role;
use concierge_core::profile::ProfileStore;
use concierge_core::signals::HydratedSignals;
use concierge_memory::ContextStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Capabilities shared by every subprocess of a session.
pub struct EnrichmentContext {
    pub generator: Option<Arc<dyn Generator>>,
    pub profiles: Arc<dyn ProfileStore>,
    pub timeout: Duration,
    pub options: GenerationOptions,
    pub max_profile_chars: usize,
    pub max_inner_voice_chars: usize,
}

impl EnrichmentContext {
    /// The generator, if one is present and configured.
    pub fn available_generator(&self) -> Option<&Arc<dyn Generator>> {
        self.generator.as_ref().filter(|g| g.is_configured())
    }

    pub fn request(&self, messages: Vec<GenerationMessage>) -> GenerationRequest {
        GenerationRequest {
            messages,
            options: GenerationOptions {
                stream: false,
                ..self.options.clone()
            },
        }
    }
}

/// A read-only view of the session at the turn that triggered a run.
#[derive(Debug, Clone)]
pub struct EnrichmentInput {
    pub session_id: String,
    pub visitor_id: String,
    pub turn: u64,
    pub store: ContextStore,
    pub signals: HydratedSignals,
}

impl EnrichmentInput {
    /// The last `limit` visitor messages, oldest first.
    pub fn recent_visitor_messages(&self, limit: usize) -> Vec<String> {
        let mut messages: Vec<String> = self
            .store
            .entries()
            .iter()
            .rev()
            .filter(|e| e.is_exchange() && e.role == Role::User)
            .take(limit)
            .map(|e| e.content.clone())
            .collect();
        messages.reverse();
        messages
    }
}

/// A fresh result to attach to the session's context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub subprocess: String,
    pub turn: u64,
    /// Region to replace with `text`, if the result belongs in context
    pub region: Option<String>,
    pub text: String,
}

/// A gated background refinement.
///
/// The runner evaluates the policy, the capability gate and the optional
/// value check before calling `run`.
#[async_trait]
pub trait EnrichmentSubprocess: Send + Sync {
    fn name(&self) -> &str;

    fn policy(&self) -> &GatePolicy;

    /// The yes/no question asked when the policy enables a value check.
    fn value_question(&self, input: &EnrichmentInput) -> String {
        let recent = input.recent_visitor_messages(6).join("\n");
        format!(
            "Recent visitor messages:\n{recent}\n\nIs there something new here worth \
             recording about this visitor? Answer yes or no."
        )
    }

    /// Do the work and persist it. `None` means nothing worth attaching.
    async fn run(
        &self,
        input: &EnrichmentInput,
        context: &EnrichmentContext,
    ) -> concierge_core::Result<Option<EnrichmentResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::message::MemoryEntry;

    #[test]
    fn recent_visitor_messages_oldest_first() {
        let store = ContextStore::with_builtin_regions("Concierge")
            .append(MemoryEntry::user("one"))
            .append(MemoryEntry::assistant("reply"))
            .append(MemoryEntry::user("two"))
            .append(MemoryEntry::user("three"));
        let input = EnrichmentInput {
            session_id: "s".into(),
            visitor_id: "v".into(),
            turn: 3,
            store,
            signals: HydratedSignals::default(),
        };
        assert_eq!(input.recent_visitor_messages(2), vec!["two", "three"]);
    }
}
