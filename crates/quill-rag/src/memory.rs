//! Session memory stores
//!
//! Both stores serialise operations per session with a dedicated lock, so a
//! question/answer pair is always appended as a unit and two sessions never
//! wait on each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use quill_core::{Error, Message, Result, Session, SessionStore};

fn check_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(Error::InvalidInput("session id must not be empty".to_string()));
    }
    Ok(())
}

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, session_id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(session_id))))
            .clone()
    }

    async fn existing(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(session_id).cloned()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(&self, session_id: &str, user_text: &str, assistant_text: &str) -> Result<()> {
        check_session_id(session_id)?;
        let session = self.entry(session_id).await;
        session.lock().await.push_pair(user_text, assistant_text);
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        match self.existing(session_id).await {
            Some(session) => Ok(session.lock().await.messages.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        if let Some(session) = self.existing(session_id).await {
            session.lock().await.clear();
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Session store keeping one JSON file per session under a directory
pub struct FileSessionStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a session id. Ids that are not already filename-safe get
    /// a digest suffix so distinct ids never share a file.
    fn file_name(session_id: &str) -> String {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if safe == session_id {
            format!("{}.json", safe)
        } else {
            let digest = format!("{:x}", md5::compute(session_id.as_bytes()));
            format!("{}-{}.json", safe, &digest[..12])
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(Self::file_name(session_id))
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.path_for(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let session: Session = serde_json::from_str(&content).map_err(|e| {
                    Error::SessionStore(format!("Session file {} is unreadable: {}", path.display(), e))
                })?;
                Ok(Some(session))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::SessionStore(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    async fn save(&self, session: &Session) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::SessionStore(format!("Failed to create {}: {}", self.dir.display(), e)))?;
        let path = self.path_for(&session.session_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::SessionStore(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::SessionStore(format!("Failed to replace {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn append(&self, session_id: &str, user_text: &str, assistant_text: &str) -> Result<()> {
        check_session_id(session_id)?;
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?.unwrap_or_else(|| Session::new(session_id));
        session.push_pair(user_text, assistant_text);
        self.save(&session).await?;
        debug!(session_id, messages = session.messages.len(), "appended exchange");
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        if session_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;
        Ok(self.load(session_id).await?.map(|s| s.messages).unwrap_or_default())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;
        if let Some(mut session) = self.load(session_id).await? {
            session.clear();
            self.save(&session).await?;
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::SessionStore(format!("Failed to list {}: {}", self.dir.display(), e))),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::SessionStore(format!("Failed to list {}: {}", self.dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            if let Ok(session) = serde_json::from_str::<Session>(&content) {
                ids.push(session.session_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::Role;

    async fn exercise(store: &dyn SessionStore) {
        assert!(store.history("s1").await.unwrap().is_empty());

        store.append("s1", "What is osmosis?", "Water diffusion. (Source 1)").await.unwrap();
        store.append("s1", "And diffusion?", "Movement of particles. (Source 2)").await.unwrap();
        store.append("s2", "Other session", "Other answer").await.unwrap();

        let history = store.history("s1").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], Message::user("What is osmosis?"));
        assert_eq!(history[1], Message::assistant("Water diffusion. (Source 1)"));
        assert_eq!(history[2].content, "And diffusion?");
        assert_eq!(history[3].role, Role::Assistant);

        let pairs = store.pairs("s1").await.unwrap();
        assert_eq!(pairs[1], ("And diffusion?".to_string(), "Movement of particles. (Source 2)".to_string()));

        assert_eq!(store.list_sessions().await.unwrap(), vec!["s1".to_string(), "s2".to_string()]);

        store.reset("s1").await.unwrap();
        assert!(store.history("s1").await.unwrap().is_empty());
        assert_eq!(store.history("s2").await.unwrap().len(), 2);

        store.reset("never-seen").await.unwrap();
        assert!(matches!(store.append(" ", "q", "a").await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        exercise(&InMemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileSessionStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileSessionStore::new(dir.path()).append("student-1", "q", "a").await.unwrap();

        let reopened = FileSessionStore::new(dir.path());
        assert_eq!(reopened.history("student-1").await.unwrap().len(), 2);
    }

    #[test]
    fn test_unsafe_ids_do_not_collide() {
        let plain = FileSessionStore::file_name("a_b");
        let slashed = FileSessionStore::file_name("a/b");
        assert_eq!(plain, "a_b.json");
        assert_ne!(plain, slashed);
        assert!(!slashed.contains('/'));
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_paired() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("shared", &format!("q{}", i), &format!("a{}", i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let pairs = store.pairs("shared").await.unwrap();
        assert_eq!(pairs.len(), 20);
        for (q, a) in pairs {
            assert_eq!(q[1..], a[1..]);
        }
    }
}
