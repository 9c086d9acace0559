//! Built-in subprocesses: narrative profile refresh and the inner voice.

use crate::gate::GatePolicy;
use crate::persist::{PersistOutcome, write_with_retry};
use crate::subprocess::{EnrichmentContext, EnrichmentInput, EnrichmentResult, EnrichmentSubprocess};
use crate::truncate::truncate_fifo;
use async_trait::async_trait;
use concierge_core::error::CapabilityError;
use concierge_core::generation::{GenerationMessage, generate_text};
use concierge_core::message::Role;
use concierge_memory::extract;
use concierge_memory::region::{INNER_VOICE, PROFILE};
use tracing::{info, warn};

pub const PROFILE_REFRESH: &str = "profile_refresh";
pub const INNER_VOICE_NAME: &str = "inner_voice";

/// Appends a short narrative section to the visitor profile.
pub struct ProfileRefresh {
    policy: GatePolicy,
}

impl ProfileRefresh {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl EnrichmentSubprocess for ProfileRefresh {
    fn name(&self) -> &str {
        PROFILE_REFRESH
    }

    fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    async fn run(
        &self,
        input: &EnrichmentInput,
        context: &EnrichmentContext,
    ) -> concierge_core::Result<Option<EnrichmentResult>> {
        let generator = context
            .available_generator()
            .ok_or_else(|| CapabilityError::NotConfigured(PROFILE_REFRESH.into()))?;
        let profiles = &context.profiles;
        let visitor = input.visitor_id.as_str();

        let existing = profiles.profile(visitor).await?.unwrap_or_default();
        let mut prompt = String::new();
        if !existing.is_empty() {
            prompt.push_str(&format!("Current profile:\n{existing}\n\n"));
        }
        prompt.push_str("Recent visitor messages:\n");
        for message in input.recent_visitor_messages(10) {
            prompt.push_str(&format!("- {message}\n"));
        }
        prompt.push_str("\nWrite one or two sentences adding what is new about this visitor.");

        let request = context.request(vec![
            GenerationMessage::new(Role::System, "You maintain a short visitor profile."),
            GenerationMessage::new(Role::User, prompt),
        ]);
        let section = generate_text(&**generator, request, context.timeout).await?;

        let combined = truncate_fifo(&existing, section.trim(), context.max_profile_chars);
        let outcome = write_with_retry("profile", combined, |text: String| async move {
            profiles.set_profile(visitor, &text).await
        })
        .await;

        let found = extract(input.store.entries().iter().map(|e| &**e));
        for topic in &found.topics {
            if let Err(e) = profiles.add_topic(visitor, topic).await {
                warn!(visitor, topic = %topic, error = %e, "Failed to record topic");
            }
        }

        Ok(stored_result(PROFILE_REFRESH, PROFILE, input.turn, outcome))
    }
}

/// Periodic private reflection on the conversation so far.
pub struct InnerVoice {
    policy: GatePolicy,
}

impl InnerVoice {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl EnrichmentSubprocess for InnerVoice {
    fn name(&self) -> &str {
        INNER_VOICE_NAME
    }

    fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    async fn run(
        &self,
        input: &EnrichmentInput,
        context: &EnrichmentContext,
    ) -> concierge_core::Result<Option<EnrichmentResult>> {
        let generator = context
            .available_generator()
            .ok_or_else(|| CapabilityError::NotConfigured(INNER_VOICE_NAME.into()))?;
        let profiles = &context.profiles;
        let visitor = input.visitor_id.as_str();

        let mut messages = vec![GenerationMessage::new(
            Role::System,
            "Reflect privately, in a few sentences, on how this conversation is going \
             and what the visitor seems to want.",
        )];
        messages.extend(input.store.to_messages());
        let reflection = generate_text(&**generator, context.request(messages), context.timeout).await?;

        let text = truncate_fifo("", reflection.trim(), context.max_inner_voice_chars);
        let outcome = write_with_retry("inner_voice", text, |text: String| async move {
            profiles.set_inner_voice(visitor, &text).await
        })
        .await;

        Ok(stored_result(INNER_VOICE_NAME, INNER_VOICE, input.turn, outcome))
    }
}

fn stored_result(
    subprocess: &str,
    region: &str,
    turn: u64,
    outcome: PersistOutcome,
) -> Option<EnrichmentResult> {
    let text = outcome.stored()?.to_string();
    info!(subprocess, turn, chars = text.chars().count(), "Enrichment persisted");
    Some(EnrichmentResult {
        subprocess: subprocess.to_string(),
        turn,
        region: Some(region.to_string()),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::context_with;
    use concierge_core::testing::ScriptedGenerator;
    use concierge_core::message::MemoryEntry;
    use concierge_core::profile::ProfileStore;
    use concierge_core::signals::HydratedSignals;
    use concierge_memory::{ContextStore, InMemoryProfileStore};
    use std::sync::Arc;

    fn policy() -> GatePolicy {
        GatePolicy {
            enabled: true,
            interval: 1,
            max_per_session: 10,
            cooldown: None,
            value_check: false,
        }
    }

    fn input() -> EnrichmentInput {
        EnrichmentInput {
            session_id: "s1".into(),
            visitor_id: "v1".into(),
            turn: 5,
            store: ContextStore::with_builtin_regions("Concierge")
                .append(MemoryEntry::user("What does the team plan cost?"))
                .append(MemoryEntry::assistant("It starts at $20.")),
            signals: HydratedSignals::default(),
        }
    }

    #[tokio::test]
    async fn profile_refresh_appends_and_records_topics() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles.set_profile("v1", "Runs a small agency.").await.unwrap();
        let context = context_with(
            Arc::new(ScriptedGenerator::new(["Asked about team pricing."])),
            profiles.clone(),
        );

        let result = ProfileRefresh::new(policy())
            .run(&input(), &context)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.region.as_deref(), Some(PROFILE));
        assert_eq!(result.text, "Runs a small agency.\nAsked about team pricing.");
        assert_eq!(profiles.profile("v1").await.unwrap().as_deref(), Some(result.text.as_str()));
        assert_eq!(profiles.topics("v1").await.unwrap(), vec!["pricing"]);
    }

    #[tokio::test]
    async fn profile_refresh_respects_ceiling() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles.set_profile("v1", &"old fact\n".repeat(300)).await.unwrap();
        let mut context = context_with(
            Arc::new(ScriptedGenerator::new(["Fresh insight."])),
            profiles.clone(),
        );
        context.max_profile_chars = 200;

        let result = ProfileRefresh::new(policy()).run(&input(), &context).await.unwrap().unwrap();
        assert!(result.text.chars().count() <= 200);
        assert!(result.text.ends_with("Fresh insight."));
    }

    #[tokio::test]
    async fn inner_voice_replaces_previous_text() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles.set_inner_voice("v1", "earlier thought").await.unwrap();
        let context = context_with(
            Arc::new(ScriptedGenerator::new(["They are price sensitive."])),
            profiles.clone(),
        );

        let result = InnerVoice::new(policy()).run(&input(), &context).await.unwrap().unwrap();
        assert_eq!(result.text, "They are price sensitive.");
        assert_eq!(
            profiles.inner_voice("v1").await.unwrap().as_deref(),
            Some("They are price sensitive.")
        );
    }

    #[tokio::test]
    async fn dropped_write_attaches_nothing() {
        let profiles = Arc::new(InMemoryProfileStore::new().with_quota(0));
        let context = context_with(
            Arc::new(ScriptedGenerator::new(["Anything at all."])),
            profiles.clone(),
        );
        let result = InnerVoice::new(policy()).run(&input(), &context).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn generator_failure_is_an_error() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let context = context_with(Arc::new(ScriptedGenerator::new(Vec::<&str>::new())), profiles);
        assert!(ProfileRefresh::new(policy()).run(&input(), &context).await.is_err());
    }
}
