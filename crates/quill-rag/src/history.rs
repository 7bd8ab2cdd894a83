//! History policies applied when a prompt is assembled
//!
//! A policy only shapes the history that goes into the prompt; the stored
//! session log is never rewritten.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use quill_core::{CompletionGateway, CompletionRequest, Message, RagQuery, Result, pair_messages};

/// Rough token estimate (four characters per token)
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    chars.div_ceil(4)
}

#[async_trait]
pub trait HistoryPolicy: Send + Sync {
    /// Turn a stored session log into the history block of the next prompt
    async fn prepare(&self, history: Vec<Message>, query: &RagQuery) -> Result<Vec<Message>>;
}

/// Pass the whole log through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct FullHistory;

#[async_trait]
impl HistoryPolicy for FullHistory {
    async fn prepare(&self, history: Vec<Message>, _query: &RagQuery) -> Result<Vec<Message>> {
        Ok(history)
    }
}

const SUMMARY_INSTRUCTIONS: &str = "Summarise the conversation below between a student and a study assistant. \
Keep every fact, definition and source reference that was mentioned. Reply with the summary only.";

/// Collapse older pairs into one summary message once the history exceeds a
/// token budget. The most recent `keep_recent_pairs` pairs stay verbatim.
pub struct SummarizingHistory {
    gateway: Arc<dyn CompletionGateway>,
    token_budget: usize,
    keep_recent_pairs: usize,
}

impl SummarizingHistory {
    pub fn new(gateway: Arc<dyn CompletionGateway>, token_budget: usize) -> Self {
        Self {
            gateway,
            token_budget,
            keep_recent_pairs: 2,
        }
    }

    pub fn with_keep_recent_pairs(mut self, pairs: usize) -> Self {
        self.keep_recent_pairs = pairs;
        self
    }

    fn transcript(pairs: &[(String, String)]) -> String {
        pairs
            .iter()
            .map(|(q, a)| format!("Student: {}\nAssistant: {}", q, a))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl HistoryPolicy for SummarizingHistory {
    async fn prepare(&self, history: Vec<Message>, query: &RagQuery) -> Result<Vec<Message>> {
        let estimate = estimate_tokens(&history);
        if estimate <= self.token_budget {
            return Ok(history);
        }

        let pairs = pair_messages(&history);
        if pairs.len() <= self.keep_recent_pairs {
            return Ok(history);
        }
        let (older, recent) = pairs.split_at(pairs.len() - self.keep_recent_pairs);

        let request = CompletionRequest {
            messages: vec![Message::system(SUMMARY_INSTRUCTIONS), Message::user(Self::transcript(older))],
            model: query.model.clone(),
            provider: query.provider,
            api_key: query.api_key.clone(),
        };
        let summary = self.gateway.complete(request).await?;
        debug!(estimate, budget = self.token_budget, summarised_pairs = older.len(), "compacted history");

        let mut prepared = Vec::with_capacity(1 + recent.len() * 2);
        prepared.push(Message::system(format!("Summary of the earlier conversation:\n{}", summary.trim())));
        for (q, a) in recent {
            prepared.push(Message::user(q.clone()));
            prepared.push(Message::assistant(a.clone()));
        }
        Ok(prepared)
    }
}
