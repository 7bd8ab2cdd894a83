//! Chunk store trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Chunk, Result, RetrievedEvidence};

/// A document known to a chunk store, with the number of chunks it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_id: String,
    pub title: String,
    pub chunks: usize,
}

/// Durable vector index over document chunks.
///
/// `query` returns at most `top_k` items ordered by ascending distance, ties
/// broken by insertion order. An empty store yields an empty result, not an
/// error. The store owns the embedder used for query text.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Upsert chunks by `chunk_id`
    async fn add(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Atomically swap the full chunk set of one document
    async fn replace_document(&self, doc_id: &str, chunks: Vec<Chunk>) -> Result<()>;

    /// Nearest-neighbour query for free text
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<RetrievedEvidence>>;

    /// Total number of stored chunks
    async fn count(&self) -> Result<usize>;

    /// Documents present in the store, in first-insertion order
    async fn documents(&self) -> Result<Vec<StoredDocument>>;

    /// Dimension of the vectors this store accepts
    fn dimension(&self) -> usize;
}
