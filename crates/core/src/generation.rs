//! Generator trait — the abstraction over the text-generation capability.
//!
//! A Generator takes an ordered list of messages and returns either a
//! complete string or a lazily produced sequence of fragments. The runtime is
//! agnostic to the provider behind it and to whether output is streamed.

use crate::error::CapabilityError;
use crate::message::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// One message as presented to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GenerationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model hint; `None` lets the capability choose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Ask for incremental fragments instead of a whole string
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: None,
            stream: false,
        }
    }
}

/// A generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<GenerationMessage>,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Receiving half of a fragment stream.
pub type FragmentReceiver = mpsc::Receiver<Result<String, CapabilityError>>;

/// The output of a generation call.
#[derive(Debug)]
pub enum Generation {
    /// A complete string.
    Text(String),
    /// Fragments produced lazily; the channel closing ends the stream.
    Stream(FragmentReceiver),
}

impl Generation {
    /// Drain the output into one string.
    pub async fn collect(self) -> Result<String, CapabilityError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Stream(mut rx) => {
                let mut out = String::new();
                while let Some(fragment) = rx.recv().await {
                    out.push_str(&fragment?);
                }
                Ok(out)
            }
        }
    }
}

/// The core Generator trait.
///
/// Implemented by the host for whatever model it uses. Handlers call it
/// through a timeout wrapper and always have a fallback path.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Whether the capability can be called at all (keys present, etc.).
    fn is_configured(&self) -> bool {
        true
    }

    /// Generate a reply for the ordered messages.
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, CapabilityError>;
}

/// Generate and collect a whole reply within `timeout`.
///
/// Streams are drained; the deadline covers the call and every fragment.
/// An unconfigured generator or an empty reply is a capability failure.
pub async fn generate_text(
    generator: &dyn Generator,
    request: GenerationRequest,
    timeout: Duration,
) -> Result<String, CapabilityError> {
    if !generator.is_configured() {
        return Err(CapabilityError::NotConfigured(generator.name().to_string()));
    }
    let call = async { generator.generate(request).await?.collect().await };
    let text = tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| CapabilityError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })??;
    if text.trim().is_empty() {
        return Err(CapabilityError::Malformed("empty reply".into()));
    }
    Ok(text)
}
