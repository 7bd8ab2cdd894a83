//! Generation gateway: resolves a provider per request and runs the completion

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::timeout;
use tracing::debug;

use quill_core::{CompletionGateway, CompletionRequest, Error, ProviderKind, Result};

use crate::config::GatewayConfig;
#[cfg(feature = "groq")]
use crate::groq::GroqProvider;
use crate::ollama::OllamaProvider;
use crate::provider::{CompletionProvider, Provider};

/// Gateway over the built-in providers
#[derive(Debug, Clone)]
pub struct GenerationGateway {
    config: GatewayConfig,
    client: Client,
}

impl GenerationGateway {
    /// Create a gateway from configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Create a gateway from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Resolve the provider for a selector and an optional caller credential.
    ///
    /// The caller credential wins over the configured one.
    pub fn resolve(&self, kind: ProviderKind, api_key: Option<&str>) -> Result<Provider> {
        match kind {
            ProviderKind::Ollama => Ok(Provider::Ollama(OllamaProvider::new(
                self.client.clone(),
                self.config.ollama_base_url.clone(),
                self.config.temperature,
            ))),
            ProviderKind::Groq => self.resolve_groq(api_key),
        }
    }

    #[cfg(feature = "groq")]
    fn resolve_groq(&self, api_key: Option<&str>) -> Result<Provider> {
        let key = api_key
            .filter(|k| !k.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.config.groq_api_key.clone())
            .ok_or_else(|| {
                Error::Configuration(
                    "Groq API key is required. Provide it with the request or set GROQ_API_KEY."
                        .to_string(),
                )
            })?;
        Ok(Provider::Groq(GroqProvider::new(
            self.client.clone(),
            self.config.groq_api_url.clone(),
            key,
            self.config.temperature,
        )))
    }

    #[cfg(not(feature = "groq"))]
    fn resolve_groq(&self, _api_key: Option<&str>) -> Result<Provider> {
        Err(Error::Configuration(
            "The groq provider is not available in this build (enable the `groq` feature)".to_string(),
        ))
    }
}

#[async_trait]
impl CompletionGateway for GenerationGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let provider = self.resolve(request.provider, request.api_key.as_deref())?;

        debug!(
            provider = provider.name(),
            model = %request.model,
            messages = request.messages.len(),
            "sending completion request"
        );

        let generation = provider.complete(&request.messages, &request.model);
        match timeout(self.config.timeout, generation).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} did not answer within {:?}",
                provider.name(),
                self.config.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::Message;

    #[test]
    fn test_ollama_needs_no_credential() {
        let gateway = GenerationGateway::new(GatewayConfig::default()).unwrap();
        let provider = gateway.resolve(ProviderKind::Ollama, None).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[cfg(feature = "groq")]
    #[test]
    fn test_groq_without_any_key_is_configuration_error() {
        let gateway = GenerationGateway::new(GatewayConfig::default()).unwrap();
        let err = gateway.resolve(ProviderKind::Groq, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let blank = gateway.resolve(ProviderKind::Groq, Some("   ")).unwrap_err();
        assert!(matches!(blank, Error::Configuration(_)));
    }

    #[cfg(feature = "groq")]
    #[test]
    fn test_groq_key_from_request_or_config() {
        let gateway = GenerationGateway::new(GatewayConfig::default()).unwrap();
        assert_eq!(gateway.resolve(ProviderKind::Groq, Some("gsk_req")).unwrap().name(), "groq");

        let configured =
            GenerationGateway::new(GatewayConfig::default().with_groq_api_key("gsk_env")).unwrap();
        assert_eq!(configured.resolve(ProviderKind::Groq, None).unwrap().name(), "groq");
    }

    #[cfg(not(feature = "groq"))]
    #[test]
    fn test_groq_unavailable_without_feature() {
        let gateway = GenerationGateway::new(GatewayConfig::default().with_groq_api_key("k")).unwrap();
        let err = gateway.resolve(ProviderKind::Groq, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_network() {
        let gateway = GenerationGateway::new(GatewayConfig::default()).unwrap();
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            model: "llama-3.1-8b-instant".to_string(),
            provider: ProviderKind::Groq,
            api_key: None,
        };
        let err = gateway.complete(request).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
