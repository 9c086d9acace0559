//! Reply generation with timeout, streaming and a fallback path.
//!
//! Every generation call is bounded by a deadline. Streamed fragments are
//! forwarded to `speak` as they arrive. Any capability failure turns into
//! the fallback line; raw errors never reach the visitor.

use concierge_config::GenerationConfig;
use concierge_core::actions::{Actions, Utterance};
use concierge_core::error::CapabilityError;
use concierge_core::generation::{
    FragmentReceiver, Generation, GenerationMessage, GenerationOptions, GenerationRequest,
    Generator,
};
use concierge_memory::ContextStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_FALLBACK: &str =
    "Sorry, I lost my train of thought for a moment. Could you say that again?";

/// How a reply attempt ended.
#[derive(Debug, Clone)]
pub enum Reply {
    Generated(String),
    /// The capability failed; `text` was spoken instead
    Fallback { text: String, error: CapabilityError },
    /// The consumer cancelled; nothing should be appended
    Cancelled,
}

impl Reply {
    /// The text that was spoken in full, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated(text) | Self::Fallback { text, .. } => Some(text),
            Self::Cancelled => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

pub struct Responder {
    generator: Option<Arc<dyn Generator>>,
    options: GenerationOptions,
    timeout: Duration,
    fallback: String,
}

impl Responder {
    pub fn new(generator: Option<Arc<dyn Generator>>) -> Self {
        Self {
            generator,
            options: GenerationOptions::default(),
            timeout: Duration::from_secs(20),
            fallback: DEFAULT_FALLBACK.to_string(),
        }
    }

    pub fn from_config(generator: Option<Arc<dyn Generator>>, config: &GenerationConfig) -> Self {
        Self {
            options: GenerationOptions {
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: Some(config.max_tokens),
                stream: config.stream,
            },
            timeout: Duration::from_secs(config.timeout_secs),
            ..Self::new(generator)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = text.into();
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.options.stream = stream;
        self
    }

    pub fn generator(&self) -> Option<&Arc<dyn Generator>> {
        self.generator.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn fallback_text(&self) -> &str {
        &self.fallback
    }

    /// The store's ordered view as a generation request.
    pub fn request(&self, store: &ContextStore) -> GenerationRequest {
        GenerationRequest {
            messages: store.to_messages(),
            options: self.options.clone(),
        }
    }

    /// Generate a reply for `store` and speak it.
    pub async fn respond(
        &self,
        store: &ContextStore,
        actions: &dyn Actions,
        cancel: &CancellationToken,
    ) -> Reply {
        self.respond_to(self.request(store).messages, actions, cancel)
            .await
    }

    /// Generate a reply for explicit messages and speak it.
    pub async fn respond_to(
        &self,
        messages: Vec<GenerationMessage>,
        actions: &dyn Actions,
        cancel: &CancellationToken,
    ) -> Reply {
        let generator = match &self.generator {
            Some(g) if g.is_configured() => g,
            Some(g) => {
                let error = CapabilityError::NotConfigured(g.name().to_string());
                return self.fall_back(actions, error).await;
            }
            None => {
                let error = CapabilityError::NotConfigured("generator".into());
                return self.fall_back(actions, error).await;
            }
        };

        let request = GenerationRequest {
            messages,
            options: self.options.clone(),
        };
        let deadline = Instant::now() + self.timeout;

        let generation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Reply::Cancelled,
            result = timeout_at(deadline, generator.generate(request)) => match result {
                Ok(Ok(generation)) => generation,
                Ok(Err(error)) => return self.fall_back(actions, error).await,
                Err(_) => return self.fall_back(actions, self.timeout_error()).await,
            },
        };

        match generation {
            Generation::Text(text) if text.trim().is_empty() => {
                self.fall_back(actions, CapabilityError::Malformed("empty reply".into()))
                    .await
            }
            Generation::Text(text) => {
                actions.speak(Utterance::Text(text.clone())).await;
                Reply::Generated(text)
            }
            Generation::Stream(fragments) => {
                match self.stream(fragments, actions, deadline, cancel).await {
                    Ok(text) if text.trim().is_empty() => {
                        self.fall_back(actions, CapabilityError::Malformed("empty stream".into()))
                            .await
                    }
                    Ok(text) => Reply::Generated(text),
                    Err(CapabilityError::Cancelled) => {
                        debug!("Streamed reply cancelled by consumer");
                        Reply::Cancelled
                    }
                    Err(error) => self.fall_back(actions, error).await,
                }
            }
        }
    }

    /// Forward fragments to `speak` while collecting them.
    async fn stream(
        &self,
        mut fragments: FragmentReceiver,
        actions: &dyn Actions,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<String, CapabilityError> {
        let (tx, rx) = mpsc::channel::<String>(32);
        let timeout_error = self.timeout_error();

        let forward = async move {
            let mut text = String::new();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CapabilityError::Cancelled),
                    next = timeout_at(deadline, fragments.recv()) => match next {
                        Err(_) => return Err(timeout_error),
                        Ok(None) => return Ok(text),
                        Ok(Some(Err(error))) => return Err(error),
                        Ok(Some(Ok(fragment))) => {
                            text.push_str(&fragment);
                            // A listener that stopped reading does not stop collection.
                            let _ = tx.send(fragment).await;
                        }
                    },
                }
            }
        };

        let ((), result) = tokio::join!(actions.speak(Utterance::Stream(rx)), forward);
        result
    }

    async fn fall_back(&self, actions: &dyn Actions, error: CapabilityError) -> Reply {
        warn!(error = %error, "Generation failed, using fallback reply");
        actions.speak(Utterance::Text(self.fallback.clone())).await;
        Reply::Fallback {
            text: self.fallback.clone(),
            error,
        }
    }

    fn timeout_error(&self) -> CapabilityError {
        CapabilityError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::message::MemoryEntry;
    use concierge_core::testing::{RecordingActions, Script, ScriptedGenerator};

    fn store() -> ContextStore {
        ContextStore::with_builtin_regions("Concierge").append(MemoryEntry::user("hi"))
    }

    #[tokio::test]
    async fn text_reply_is_spoken() {
        let generator = Arc::new(ScriptedGenerator::new(["Hello there!"]));
        let responder = Responder::new(Some(generator.clone()));
        let actions = RecordingActions::new();

        let reply = responder.respond(&store(), &actions, &CancellationToken::new()).await;
        assert_eq!(reply.text(), Some("Hello there!"));
        assert_eq!(actions.spoken(), vec!["Hello there!"]);

        let request = &generator.requests()[0];
        assert_eq!(request.messages.last().map(|m| m.content.as_str()), Some("hi"));
    }

    #[tokio::test]
    async fn missing_generator_speaks_fallback() {
        let responder = Responder::new(None).with_fallback("One moment!");
        let actions = RecordingActions::new();
        let reply = responder.respond(&store(), &actions, &CancellationToken::new()).await;
        assert!(reply.is_fallback());
        assert_eq!(actions.spoken(), vec!["One moment!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generator_times_out_to_fallback() {
        let generator = Arc::new(ScriptedGenerator::from_script([Script::Delayed {
            delay: Duration::from_secs(30),
            text: "too late".into(),
        }]));
        let responder = Responder::new(Some(generator)).with_timeout(Duration::from_secs(20));
        let actions = RecordingActions::new();

        let reply = responder.respond(&store(), &actions, &CancellationToken::new()).await;
        match reply {
            Reply::Fallback { error, .. } => {
                assert!(matches!(error, CapabilityError::Timeout { timeout_ms: 20_000 }));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(actions.spoken(), vec![DEFAULT_FALLBACK]);
    }

    #[tokio::test]
    async fn streamed_reply_is_forwarded_and_collected() {
        let generator = Arc::new(ScriptedGenerator::from_script([Script::Stream {
            fragments: vec!["Hi ".into(), "there".into()],
            gap: Duration::ZERO,
        }]));
        let responder = Responder::new(Some(generator)).with_streaming(true);
        let actions = RecordingActions::new();

        let reply = responder.respond(&store(), &actions, &CancellationToken::new()).await;
        assert_eq!(reply.text(), Some("Hi there"));
        assert_eq!(actions.spoken(), vec!["Hi there"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_stream_returns_cancelled() {
        let generator = Arc::new(ScriptedGenerator::from_script([Script::Stream {
            fragments: vec!["one ".into(), "two ".into(), "three".into()],
            gap: Duration::from_secs(1),
        }]));
        let responder = Responder::new(Some(generator)).with_streaming(true);
        let actions = RecordingActions::new();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            canceller.cancel();
        });

        let reply = responder.respond(&store(), &actions, &cancel).await;
        assert!(matches!(reply, Reply::Cancelled));
        assert_eq!(reply.text(), None);
    }

    #[tokio::test]
    async fn stream_error_falls_back() {
        let generator = Arc::new(ScriptedGenerator::from_script([Script::Fail(
            CapabilityError::StreamInterrupted("reset".into()),
        )]));
        let responder = Responder::new(Some(generator));
        let actions = RecordingActions::new();
        let reply = responder.respond(&store(), &actions, &CancellationToken::new()).await;
        assert!(reply.is_fallback());
    }

    #[tokio::test]
    async fn config_sets_options_and_timeout() {
        let config = GenerationConfig {
            model: Some("small".into()),
            temperature: 0.2,
            max_tokens: 128,
            timeout_secs: 5,
            stream: true,
        };
        let responder = Responder::from_config(None, &config);
        assert_eq!(responder.timeout(), Duration::from_secs(5));
        assert_eq!(responder.options().max_tokens, Some(128));
        assert!(responder.options().stream);
    }
}
