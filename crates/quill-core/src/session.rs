//! Session memory trait

use async_trait::async_trait;

use crate::{Message, Result, pair_messages};

/// Per-session conversation log.
///
/// Implementations serialise `append`/`history`/`reset` per session and never
/// expose one session's messages through another session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append a (question, answer) pair atomically, creating the session if needed
    async fn append(&self, session_id: &str, user_text: &str, assistant_text: &str) -> Result<()>;

    /// Messages of a session, oldest first; empty for unknown sessions
    async fn history(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Remove every message of a session
    async fn reset(&self, session_id: &str) -> Result<()>;

    /// Known session ids
    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// History regrouped as (question, answer) pairs
    async fn pairs(&self, session_id: &str) -> Result<Vec<(String, String)>> {
        let messages = self.history(session_id).await?;
        Ok(pair_messages(&messages))
    }
}
