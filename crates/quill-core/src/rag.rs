//! Query/answer contract of the retrieval-generation orchestrator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ProviderKind, Result, RetrievedEvidence};

/// Default chat model, served by the local provider
pub const DEFAULT_MODEL: &str = "qwen2.5:14b-instruct";

/// Default number of evidence chunks requested per query
pub const DEFAULT_TOP_K: usize = 5;

/// A question to answer from the corpus
#[derive(Clone, Serialize, Deserialize)]
pub struct RagQuery {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub k: usize,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl RagQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            k: DEFAULT_TOP_K,
            session_id: None,
            model: DEFAULT_MODEL.to_string(),
            provider: ProviderKind::default(),
            api_key: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl std::fmt::Debug for RagQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagQuery")
            .field("query", &self.query)
            .field("k", &self.k)
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Terminal outcome of the grounding protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Grounded answer backed by at least one evidence item
    Answered,
    /// Evidence judged insufficient; the answer is the refusal sentence
    Refused,
}

/// Response of the orchestrator. A refusal is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub outcome: Outcome,
    /// Evidence in retrieval rank order; `sources[i]` is "Source i+1"
    pub sources: Vec<RetrievedEvidence>,
    /// Distinct 1-based source labels cited by the answer, in order of first use
    pub citations: Vec<usize>,
}

impl RagAnswer {
    pub fn is_refusal(&self) -> bool {
        self.outcome == Outcome::Refused
    }

    /// Evidence item behind a "Source N" label
    pub fn source(&self, label: usize) -> Option<&RetrievedEvidence> {
        label.checked_sub(1).and_then(|i| self.sources.get(i))
    }
}

/// Trait for retrieval-generation orchestrators
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Answer a query strictly from retrieved evidence
    async fn answer(&self, query: RagQuery) -> Result<RagAnswer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_from_json() {
        let query: RagQuery = serde_json::from_str(r#"{"query": "What is osmosis?"}"#).unwrap();
        assert_eq!(query.k, DEFAULT_TOP_K);
        assert_eq!(query.model, DEFAULT_MODEL);
        assert_eq!(query.provider, ProviderKind::Ollama);
        assert!(query.session_id.is_none());
    }

    #[test]
    fn test_source_labels_are_one_based() {
        let evidence = RetrievedEvidence {
            doc_id: "d".into(),
            title: "t".into(),
            chunk_index: 0,
            page: None,
            text: "x".into(),
            score: 0.1,
        };
        let answer = RagAnswer {
            answer: "x (Source 1)".into(),
            outcome: Outcome::Answered,
            sources: vec![evidence.clone()],
            citations: vec![1],
        };
        assert_eq!(answer.source(1), Some(&evidence));
        assert_eq!(answer.source(0), None);
        assert_eq!(answer.source(2), None);
    }
}
