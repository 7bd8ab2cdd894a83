//! Groq hosted provider (OpenAI-compatible chat completions)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use quill_core::{Error, Message, Result};

use crate::provider::{CompletionProvider, transport_error};

/// Chat completions against the Groq API. Always carries a credential.
#[derive(Clone)]
pub struct GroqProvider {
    client: Client,
    api_url: String,
    api_key: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GroqProvider {
    pub fn new(client: Client, api_url: impl Into<String>, api_key: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            temperature,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_url)
    }

    pub(crate) fn build_request<'a>(&self, messages: &'a [Message], model: &'a str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model,
            messages,
            temperature: self.temperature,
        }
    }

    pub(crate) fn parse_response(body: &str) -> Result<String> {
        let parsed: ChatCompletionResponse = serde_json::from_str(body)
            .map_err(|e| Error::Provider(format!("Failed to decode Groq response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(Error::Provider("Empty response from Groq".to_string()));
        }
        Ok(content)
    }

    fn describe_failure(body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string())
    }
}

impl std::fmt::Debug for GroqProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqProvider")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    fn name(&self) -> &'static str {
        "groq"
    }

    async fn complete(&self, messages: &[Message], model: &str) -> Result<String> {
        let body = self.build_request(messages, model);

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("groq", e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error("groq", e))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Configuration(format!(
                "Groq rejected the API key ({}): {}",
                status,
                Self::describe_failure(&text)
            )));
        }
        if !status.is_success() {
            return Err(Error::Provider(format!(
                "Groq request failed with status {}: {}",
                status,
                Self::describe_failure(&text)
            )));
        }

        Self::parse_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GroqProvider {
        GroqProvider::new(Client::new(), "https://api.groq.com/openai/v1/", "gsk_test", 0.2)
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            provider().completions_url(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![Message::user("hello")];
        let body = serde_json::to_value(provider().build_request(&messages, "llama-3.1-8b-instant")).unwrap();
        assert_eq!(body["model"], "llama-3.1-8b-instant");
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Chlorophyll absorbs light. (Source 2)"}}]}"#;
        assert_eq!(
            GroqProvider::parse_response(body).unwrap(),
            "Chlorophyll absorbs light. (Source 2)"
        );
    }

    #[test]
    fn test_parse_no_choices_is_provider_error() {
        assert!(matches!(
            GroqProvider::parse_response(r#"{"choices":[]}"#),
            Err(Error::Provider(_))
        ));
    }

    #[test]
    fn test_describe_failure_extracts_message() {
        let body = r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        assert_eq!(GroqProvider::describe_failure(body), "model not found");
        assert_eq!(GroqProvider::describe_failure("plain"), "plain");
    }

    #[test]
    fn test_debug_redacts_key() {
        assert!(!format!("{:?}", provider()).contains("gsk_test"));
    }
}
