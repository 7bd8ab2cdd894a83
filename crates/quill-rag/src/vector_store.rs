//! File-backed chunk store
//!
//! One JSON file per collection under the data directory. Every mutation is
//! applied to a copy of the collection, written to a temporary file and
//! renamed over the previous one; the in-memory view only changes once the
//! write has landed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use quill_core::{Chunk, ChunkStore, Embedder, Error, Result, RetrievedEvidence, StoredDocument};

/// Cosine distance, `1 - cos(a, b)`.
///
/// Mismatched lengths and zero vectors are maximally unrelated (distance 1.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    /// Insertion sequence, used as the tie-breaker between equal distances
    seq: u64,
    #[serde(flatten)]
    chunk: Chunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Collection {
    name: String,
    dimension: usize,
    next_seq: u64,
    chunks: Vec<StoredChunk>,
}

impl Collection {
    fn empty(name: &str, dimension: usize) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            next_seq: 0,
            chunks: Vec::new(),
        }
    }

    fn upsert(&mut self, chunk: Chunk) {
        if let Some(existing) = self.chunks.iter_mut().find(|c| c.chunk.chunk_id == chunk.chunk_id) {
            existing.chunk = chunk;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.chunks.push(StoredChunk { seq, chunk });
    }

    fn replace_document(&mut self, doc_id: &str, chunks: Vec<Chunk>) {
        let previous: Vec<StoredChunk> = self.chunks.iter().filter(|c| c.chunk.doc_id == doc_id).cloned().collect();
        self.chunks.retain(|c| c.chunk.doc_id != doc_id);

        for chunk in chunks {
            match previous.iter().find(|p| p.chunk.chunk_id == chunk.chunk_id) {
                Some(old) => self.chunks.push(StoredChunk { seq: old.seq, chunk }),
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.chunks.push(StoredChunk { seq, chunk });
                }
            }
        }
        self.chunks.sort_by_key(|c| c.seq);
    }
}

/// Chunk store persisted as a JSON collection file.
pub struct LocalChunkStore {
    path: Option<PathBuf>,
    embedder: Arc<dyn Embedder>,
    state: RwLock<Collection>,
}

impl LocalChunkStore {
    /// Open (or create) `<data_dir>/<collection>.json`
    pub async fn open(data_dir: impl AsRef<Path>, collection: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if collection.trim().is_empty() {
            return Err(Error::Configuration("collection name must not be empty".to_string()));
        }
        let path = data_dir.as_ref().join(format!("{}.json", collection));
        let dimension = embedder.dimension();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let loaded: Collection = serde_json::from_str(&content).map_err(|e| {
                    Error::ChunkStore(format!("Collection file {} is unreadable: {}", path.display(), e))
                })?;
                if loaded.dimension != dimension {
                    return Err(Error::Configuration(format!(
                        "Collection '{}' holds {}-dimensional vectors but the embedder produces {}",
                        collection, loaded.dimension, dimension
                    )));
                }
                info!(collection, chunks = loaded.chunks.len(), "loaded chunk store");
                loaded
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collection::empty(collection, dimension),
            Err(e) => return Err(Error::ChunkStore(format!("Failed to read {}: {}", path.display(), e))),
        };

        Ok(Self {
            path: Some(path),
            embedder,
            state: RwLock::new(state),
        })
    }

    /// A store that lives only as long as the process
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        let dimension = embedder.dimension();
        Self {
            path: None,
            embedder,
            state: RwLock::new(Collection::empty("memory", dimension)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_dimensions(&self, chunks: &[Chunk]) -> Result<()> {
        let expected = self.embedder.dimension();
        match chunks.iter().find(|c| c.embedding.len() != expected) {
            Some(bad) => Err(Error::ChunkStore(format!(
                "chunk {} has a {}-dimensional embedding, expected {}",
                bad.chunk_id,
                bad.embedding.len(),
                expected
            ))),
            None => Ok(()),
        }
    }

    async fn persist(&self, collection: &Collection) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::ChunkStore(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        let content = serde_json::to_vec_pretty(collection)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::ChunkStore(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::ChunkStore(format!("Failed to replace {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        self.check_dimensions(&chunks)?;
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let added = chunks.len();
        for chunk in chunks {
            next.upsert(chunk);
        }
        self.persist(&next).await?;
        *state = next;
        debug!(added, total = state.chunks.len(), "upserted chunks");
        Ok(())
    }

    async fn replace_document(&self, doc_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        self.check_dimensions(&chunks)?;
        if let Some(foreign) = chunks.iter().find(|c| c.doc_id != doc_id) {
            return Err(Error::InvalidInput(format!(
                "chunk {} belongs to document {}, not {}",
                foreign.chunk_id, foreign.doc_id, doc_id
            )));
        }
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.replace_document(doc_id, chunks);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<RetrievedEvidence>> {
        if top_k == 0 || self.state.read().await.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(text).await?;

        let state = self.state.read().await;
        let mut scored: Vec<(f32, u64, &Chunk)> = state
            .chunks
            .iter()
            .map(|c| (cosine_distance(&query_vector, &c.chunk.embedding), c.seq, &c.chunk))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(distance, _, chunk)| RetrievedEvidence::from_chunk(chunk, distance))
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.chunks.len())
    }

    async fn documents(&self) -> Result<Vec<StoredDocument>> {
        let state = self.state.read().await;
        let mut documents: Vec<StoredDocument> = Vec::new();
        for stored in &state.chunks {
            match documents.iter_mut().find(|d| d.doc_id == stored.chunk.doc_id) {
                Some(doc) => doc.chunks += 1,
                None => documents.push(StoredDocument {
                    doc_id: stored.chunk.doc_id.clone(),
                    title: stored.chunk.title.clone(),
                    chunks: 1,
                }),
            }
        }
        Ok(documents)
    }

    fn dimension(&self) -> usize {
        self.embedder.dimension()
    }
}
