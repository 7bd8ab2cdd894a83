//! Pipeline configuration and component wiring

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use quill_core::{
    ChunkStore, DEFAULT_MODEL, DEFAULT_TOP_K, Embedder, Error, IndexingConfig, ProviderKind, Result, SessionStore,
};

use crate::embedder::{DEFAULT_EMBEDDING_DIM, HashEmbedder, OllamaEmbedder};
use crate::memory::{FileSessionStore, InMemorySessionStore};
use crate::splitter::RecursiveSplitter;
use crate::vector_store::LocalChunkStore;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_COLLECTION: &str = "quill_docs";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedderKind {
    #[default]
    Hash,
    Ollama,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hash" => Ok(EmbedderKind::Hash),
            "ollama" => Ok(EmbedderKind::Ollama),
            other => Err(Error::Configuration(format!(
                "Unknown embedder '{}'; expected hash or ollama",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStoreKind {
    Memory,
    #[default]
    File,
}

impl FromStr for SessionStoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(SessionStoreKind::Memory),
            "file" => Ok(SessionStoreKind::File),
            other => Err(Error::Configuration(format!(
                "Unknown session store '{}'; expected memory or file",
                other
            ))),
        }
    }
}

/// Settings for ingestion, retrieval and session memory
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub collection: String,
    pub indexing: IndexingConfig,
    pub top_k: usize,
    pub model: String,
    pub provider: ProviderKind,
    pub embedder: EmbedderKind,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub ollama_base_url: String,
    pub session_store: SessionStoreKind,
    /// Enables summarising compaction of long histories
    pub history_token_budget: Option<usize>,
    pub max_distance: Option<f32>,
    pub qdrant_url: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            collection: DEFAULT_COLLECTION.to_string(),
            indexing: IndexingConfig::default(),
            top_k: DEFAULT_TOP_K,
            model: DEFAULT_MODEL.to_string(),
            provider: ProviderKind::default(),
            embedder: EmbedderKind::default(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            ollama_base_url: DEFAULT_OLLAMA_URL.to_string(),
            session_store: SessionStoreKind::default(),
            history_token_budget: None,
            max_distance: None,
            qdrant_url: None,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Configuration(format!("{} has an invalid value: '{}'", key, raw))),
        None => Ok(None),
    }
}

impl RagConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            data_dir: lookup("QUILL_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            collection: lookup("QUILL_COLLECTION").unwrap_or(defaults.collection),
            indexing: IndexingConfig {
                chunk_size: parse_var(&lookup, "QUILL_CHUNK_SIZE")?.unwrap_or(defaults.indexing.chunk_size),
                chunk_overlap: parse_var(&lookup, "QUILL_CHUNK_OVERLAP")?.unwrap_or(defaults.indexing.chunk_overlap),
            },
            top_k: parse_var(&lookup, "QUILL_TOP_K")?.unwrap_or(defaults.top_k),
            model: lookup("QUILL_MODEL").unwrap_or(defaults.model),
            provider: match lookup("QUILL_PROVIDER") {
                Some(raw) => raw.parse()?,
                None => defaults.provider,
            },
            embedder: match lookup("QUILL_EMBEDDER") {
                Some(raw) => raw.parse()?,
                None => defaults.embedder,
            },
            embedding_model: lookup("QUILL_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dim: parse_var(&lookup, "QUILL_EMBEDDING_DIM")?.unwrap_or(defaults.embedding_dim),
            ollama_base_url: lookup("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
            session_store: match lookup("QUILL_SESSION_STORE") {
                Some(raw) => raw.parse()?,
                None => defaults.session_store,
            },
            history_token_budget: parse_var(&lookup, "QUILL_HISTORY_TOKEN_BUDGET")?,
            max_distance: parse_var(&lookup, "QUILL_MAX_DISTANCE")?,
            qdrant_url: lookup("QDRANT_URL").filter(|u| !u.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        RecursiveSplitter::from_config(&self.indexing)?;
        if self.collection.trim().is_empty() {
            return Err(Error::Configuration("QUILL_COLLECTION must not be empty".to_string()));
        }
        if self.top_k == 0 {
            return Err(Error::Configuration("QUILL_TOP_K must be at least 1".to_string()));
        }
        if self.embedding_dim == 0 {
            return Err(Error::Configuration("QUILL_EMBEDDING_DIM must be positive".to_string()));
        }
        if let Some(max) = self.max_distance {
            if !max.is_finite() {
                return Err(Error::Configuration("QUILL_MAX_DISTANCE must be a finite number".to_string()));
            }
        }
        Ok(())
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn Embedder>> {
        Ok(match self.embedder {
            EmbedderKind::Hash => Arc::new(HashEmbedder::new(self.embedding_dim)?),
            EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
                self.ollama_base_url.clone(),
                self.embedding_model.clone(),
                self.embedding_dim,
            )?),
        })
    }

    /// Open the configured chunk store: Qdrant when `QDRANT_URL` is set and
    /// the `qdrant` feature is built, the local JSON collection otherwise.
    pub async fn open_store(&self, embedder: Arc<dyn Embedder>) -> Result<Arc<dyn ChunkStore>> {
        #[cfg(feature = "qdrant")]
        if let Some(url) = &self.qdrant_url {
            let store = crate::qdrant_store::QdrantChunkStore::connect(url, &self.collection, embedder).await?;
            info!(url = %url, collection = %self.collection, "using qdrant chunk store");
            return Ok(Arc::new(store));
        }

        #[cfg(not(feature = "qdrant"))]
        if self.qdrant_url.is_some() {
            return Err(Error::Configuration(
                "QDRANT_URL is set but this build lacks the `qdrant` feature".to_string(),
            ));
        }

        let store = LocalChunkStore::open(&self.data_dir, &self.collection, embedder).await?;
        info!(data_dir = %self.data_dir.display(), collection = %self.collection, "using local chunk store");
        Ok(Arc::new(store))
    }

    pub fn build_session_store(&self) -> Arc<dyn SessionStore> {
        match self.session_store {
            SessionStoreKind::Memory => Arc::new(InMemorySessionStore::new()),
            SessionStoreKind::File => Arc::new(FileSessionStore::new(self.sessions_dir())),
        }
    }
}
