//! Document ingestion trait and types

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub doc_id: String,
    pub title: String,
    pub pages: usize,
    pub chunks: usize,
}

/// Chunking policy for ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Target maximum chunk length, in characters
    pub chunk_size: usize,
    /// Characters carried over between consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            chunk_overlap: 50,
        }
    }
}

/// Entry point used by upload handling.
///
/// Ingestion is all-or-nothing per document: on error no chunk of `doc_id`
/// from this call is visible.
#[async_trait]
pub trait DocumentIndexer: Send + Sync {
    /// Extract, chunk, embed and store a file already on disk
    async fn ingest_file(&self, path: &Path, doc_id: &str, title: &str) -> Result<IngestionReport>;
}
