//! Common types used across the Quill pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub title: String,
}

/// Deterministic chunk identity: `doc_id + "_" + chunk_index`.
pub fn chunk_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{}_{}", doc_id, chunk_index)
}

/// A bounded excerpt of a document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub chunk_index: usize,
    /// 1-based page the chunk was cut from, when the source has pages.
    #[serde(default)]
    pub page: Option<u32>,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn new(
        doc_id: impl Into<String>,
        title: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let doc_id = doc_id.into();
        Self {
            chunk_id: chunk_id(&doc_id, chunk_index),
            doc_id,
            title: title.into(),
            chunk_index,
            page: None,
            text: text.into(),
            embedding,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// A retrieved chunk together with its query-specific distance.
///
/// `score` is a distance: lower is better, and no fixed range is promised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedEvidence {
    pub doc_id: String,
    pub title: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub page: Option<u32>,
    pub text: String,
    pub score: f32,
}

impl RetrievedEvidence {
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            doc_id: chunk.doc_id.clone(),
            title: chunk.title.clone(),
            chunk_index: chunk.chunk_index,
            page: chunk.page,
            text: chunk.text.clone(),
            score,
        }
    }
}

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and synthetic summaries; never stored in a session log.
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation log. Messages alternate user/assistant, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a (question, answer) pair in that order.
    pub fn push_pair(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.messages.push(Message::user(user_text));
        self.messages.push(Message::assistant(assistant_text));
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }
}

/// Group a message log into (question, answer) pairs.
///
/// A user message not immediately followed by an assistant message is skipped,
/// as is any other stray message.
pub fn pair_messages(messages: &[Message]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        match (messages.get(i), messages.get(i + 1)) {
            (Some(q), Some(a)) if q.role == Role::User && a.role == Role::Assistant => {
                pairs.push((q.content.clone(), a.content.clone()));
                i += 2;
            }
            _ => i += 1,
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_deterministic() {
        let a = Chunk::new("doc-7", "notes.pdf", 3, "text", vec![]);
        let b = Chunk::new("doc-7", "notes.pdf", 3, "other text", vec![1.0]);
        assert_eq!(a.chunk_id, "doc-7_3");
        assert_eq!(a.chunk_id, b.chunk_id);
    }

    #[test]
    fn pairs_skip_dangling_messages() {
        let messages = vec![
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("orphan"),
            Message::user("q2"),
            Message::assistant("a2"),
        ];
        assert_eq!(
            pair_messages(&messages),
            vec![
                ("q1".to_string(), "a1".to_string()),
                ("q2".to_string(), "a2".to_string())
            ]
        );
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn session_push_pair_keeps_order() {
        let mut session = Session::new("s1");
        session.push_pair("q1", "a1");
        session.push_pair("q2", "a2");
        let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        session.clear();
        assert!(session.messages.is_empty());
    }
}
