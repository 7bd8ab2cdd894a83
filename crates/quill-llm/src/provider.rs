//! Provider capability and the tagged union of built-in providers

use async_trait::async_trait;

use quill_core::{Error, Message, Result};

#[cfg(feature = "groq")]
use crate::groq::GroqProvider;
use crate::ollama::OllamaProvider;

/// One chat-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short provider name used in logs and errors
    fn name(&self) -> &'static str;

    /// Run one non-streaming completion
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String>;
}

/// A provider resolved from configuration.
///
/// Variants whose integration is compiled out do not exist; selecting them is
/// reported by the gateway as a configuration error.
#[derive(Debug, Clone)]
pub enum Provider {
    Ollama(OllamaProvider),
    #[cfg(feature = "groq")]
    Groq(GroqProvider),
}

#[async_trait]
impl CompletionProvider for Provider {
    fn name(&self) -> &'static str {
        match self {
            Provider::Ollama(p) => p.name(),
            #[cfg(feature = "groq")]
            Provider::Groq(p) => p.name(),
        }
    }

    async fn complete(&self, messages: &[Message], model: &str) -> Result<String> {
        match self {
            Provider::Ollama(p) => p.complete(messages, model).await,
            #[cfg(feature = "groq")]
            Provider::Groq(p) => p.complete(messages, model).await,
        }
    }
}

/// Map a reqwest failure onto the error taxonomy
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{} request timed out: {}", provider, err))
    } else {
        Error::Provider(format!("{} request failed: {}", provider, err))
    }
}
