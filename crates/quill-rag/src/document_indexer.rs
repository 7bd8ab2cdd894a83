//! Ingestion pipeline: extract, split, embed, store

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use quill_core::{Chunk, ChunkStore, DocumentIndexer, Embedder, Error, IndexingConfig, IngestionReport, Result};

use crate::extract::{PageText, extract_pages};
use crate::splitter::RecursiveSplitter;

/// Document indexer over any [`ChunkStore`] and [`Embedder`].
///
/// Chunk indices run contiguously across pages. All chunks of a document are
/// embedded before anything is written, then swapped in with a single
/// `replace_document`, so a failed ingestion leaves the previous version of
/// the document (if any) untouched.
pub struct IngestionPipeline {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    splitter: RecursiveSplitter,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::with_config(store, embedder, IndexingConfig::default())
    }

    pub fn with_config(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>, config: IndexingConfig) -> Result<Self> {
        if store.dimension() != embedder.dimension() {
            return Err(Error::Configuration(format!(
                "chunk store expects {}-dimensional vectors but the embedder produces {}",
                store.dimension(),
                embedder.dimension()
            )));
        }
        Ok(Self {
            store,
            embedder,
            splitter: RecursiveSplitter::from_config(&config)?,
        })
    }

    pub fn splitter(&self) -> &RecursiveSplitter {
        &self.splitter
    }

    /// Index already-extracted text
    pub async fn ingest_pages(&self, doc_id: &str, title: &str, pages: Vec<PageText>) -> Result<IngestionReport> {
        if doc_id.trim().is_empty() {
            return Err(Error::InvalidInput("doc_id must not be empty".to_string()));
        }

        let page_count = pages.len();
        let mut pieces: Vec<(Option<u32>, String)> = Vec::new();
        for page in pages {
            for text in self.splitter.split(&page.text) {
                pieces.push((page.page, text));
            }
        }

        if pieces.is_empty() {
            return Err(Error::Ingestion(format!("'{}' contains no extractable text", title)));
        }

        let texts: Vec<String> = pieces.iter().map(|(_, t)| t.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != pieces.len() {
            return Err(Error::Provider(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                pieces.len()
            )));
        }

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, ((page, text), vector))| {
                let chunk = Chunk::new(doc_id, title, index, text, vector);
                match page {
                    Some(p) => chunk.with_page(p),
                    None => chunk,
                }
            })
            .collect();

        let chunk_count = chunks.len();
        self.store.replace_document(doc_id, chunks).await?;

        info!(doc_id, title, pages = page_count, chunks = chunk_count, "ingested document");
        Ok(IngestionReport {
            doc_id: doc_id.to_string(),
            title: title.to_string(),
            pages: page_count,
            chunks: chunk_count,
        })
    }
}

#[async_trait]
impl DocumentIndexer for IngestionPipeline {
    async fn ingest_file(&self, path: &Path, doc_id: &str, title: &str) -> Result<IngestionReport> {
        let pages = extract_pages(path).await?;
        self.ingest_pages(doc_id, title, pages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::vector_store::LocalChunkStore;

    fn pipeline(chunk_size: usize, overlap: usize) -> (IngestionPipeline, Arc<LocalChunkStore>) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let store = Arc::new(LocalChunkStore::in_memory(embedder.clone()));
        let config = IndexingConfig {
            chunk_size,
            chunk_overlap: overlap,
        };
        (IngestionPipeline::with_config(store.clone(), embedder, config).unwrap(), store)
    }

    #[tokio::test]
    async fn test_contiguous_indices_across_pages() {
        let (pipeline, store) = pipeline(60, 10);
        let pages = vec![
            PageText::page(1, "Cells are the basic unit of life and all organisms are made of cells."),
            PageText::page(2, "   "),
            PageText::page(3, "Photosynthesis happens in chloroplasts."),
        ];

        let report = pipeline.ingest_pages("bio", "biology.pdf", pages).await.unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(report.chunks, store.count().await.unwrap());

        let hits = store.query("photosynthesis chloroplasts", 10).await.unwrap();
        let mut indices: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        indices.sort();
        assert_eq!(indices, (0..report.chunks).collect::<Vec<_>>());

        let last = hits.iter().find(|h| h.chunk_index == report.chunks - 1).unwrap();
        assert_eq!(last.page, Some(3));
        assert!(hits.iter().all(|h| h.page != Some(2)));
    }

    #[tokio::test]
    async fn test_no_text_is_ingestion_error() {
        let (pipeline, store) = pipeline(400, 50);
        let err = pipeline
            .ingest_pages("empty", "scan.pdf", vec![PageText::page(1, "\n \n")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reingestion_replaces_previous_chunks() {
        let (pipeline, store) = pipeline(30, 5);
        let long = "one two three four five six seven eight nine ten eleven twelve";
        let first = pipeline.ingest_pages("d", "d.txt", vec![PageText::unpaged(long)]).await.unwrap();
        assert!(first.chunks > 1);

        let second = pipeline
            .ingest_pages("d", "d.txt", vec![PageText::unpaged("short now")])
            .await
            .unwrap();
        assert_eq!(second.chunks, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_file_unsupported_type() {
        let (pipeline, _) = pipeline(400, 50);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slides.pptx");
        std::fs::write(&path, b"binary").unwrap();
        let err = pipeline.ingest_file(&path, "s", "slides.pptx").await.unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)));
    }

    #[test]
    fn test_dimension_mismatch_is_configuration_error() {
        let store = Arc::new(LocalChunkStore::in_memory(Arc::new(HashEmbedder::new(32).unwrap())));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let err = IngestionPipeline::new(store, embedder).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
