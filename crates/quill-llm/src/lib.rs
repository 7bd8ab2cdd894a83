//! Generation gateway for Quill
//!
//! This crate provides the interchangeable completion providers (a local
//! Ollama server and the hosted Groq API) and the [`GenerationGateway`] that
//! resolves one of them per request and implements
//! [`quill_core::CompletionGateway`].

mod config;
mod gateway;
#[cfg(feature = "groq")]
mod groq;
mod ollama;
mod provider;


pub use config::{DEFAULT_GROQ_URL, DEFAULT_OLLAMA_URL, GatewayConfig};
pub use gateway::GenerationGateway;
#[cfg(feature = "groq")]
pub use groq::GroqProvider;
pub use ollama::OllamaProvider;
pub use provider::{CompletionProvider, Provider};

// Re-export core types for convenience
pub use quill_core::{CompletionGateway, CompletionRequest, Error, Message, ProviderKind, Result, Role};
