//! Locally hosted Ollama provider

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use quill_core::{Error, Message, Result};

use crate::provider::{CompletionProvider, transport_error};

/// Chat completions against a local Ollama server. No credential is needed.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaProvider {
    pub fn new(client: Client, base_url: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            temperature,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    pub(crate) fn build_request<'a>(&self, messages: &'a [Message], model: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        }
    }

    pub(crate) fn parse_response(body: &str) -> Result<String> {
        let parsed: ChatResponse = serde_json::from_str(body)
            .map_err(|e| Error::Provider(format!("Failed to decode Ollama response: {}", e)))?;
        let content = parsed.message.content.trim().to_string();
        if content.is_empty() {
            return Err(Error::Provider("Empty response from Ollama".to_string()));
        }
        Ok(content)
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, messages: &[Message], model: &str) -> Result<String> {
        let body = self.build_request(messages, model);

        let response = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error("ollama", e))?;

        if !status.is_success() {
            return Err(Error::Provider(format!(
                "Ollama request failed with status {}: {}",
                status, text
            )));
        }

        Self::parse_response(&text)
    }
}
