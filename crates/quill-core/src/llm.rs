//! Generation gateway trait and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Message, Result};

/// Completion provider selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Locally hosted Ollama server; no credential required
    #[default]
    Ollama,
    /// Groq hosted API; requires an API key
    Groq,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::Groq => "groq",
        }
    }

    /// Whether the provider needs a credential
    pub fn requires_credential(&self) -> bool {
        matches!(self, ProviderKind::Groq)
    }

    pub fn all() -> Vec<ProviderKind> {
        vec![ProviderKind::Ollama, ProviderKind::Groq]
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            "groq" => Ok(ProviderKind::Groq),
            other => Err(Error::Configuration(format!(
                "Unknown provider '{}'; expected one of: ollama, groq",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completion call: an ordered message list plus provider selection.
#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub provider: ProviderKind,
    /// Caller-supplied credential; falls back to process configuration
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("messages", &self.messages.len())
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Selects a provider and runs one completion.
///
/// Fails with [`Error::Configuration`] when the selected provider cannot be
/// used (missing credential, integration not compiled in) and with
/// [`Error::Provider`]/[`Error::Timeout`] when the upstream call fails.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert_eq!("GROQ".parse::<ProviderKind>().unwrap(), ProviderKind::Groq);
        assert_eq!(" local ".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);

        let err = "openai".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_credential_requirement() {
        assert!(!ProviderKind::Ollama.requires_credential());
        assert!(ProviderKind::Groq.requires_credential());
        assert_eq!(ProviderKind::all().len(), 2);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            model: "llama3".to_string(),
            provider: ProviderKind::Groq,
            api_key: Some("gsk_secret".to_string()),
        };
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("gsk_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
