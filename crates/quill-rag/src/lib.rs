//! Retrieval-augmented generation engine for Quill
//!
//! Ingestion turns uploaded files into embedded chunks in a [`ChunkStore`];
//! [`RagEngine`] answers questions strictly from the chunks it retrieves,
//! keeping a per-session conversation log.
//!
//! | feature  | adds                                      |
//! |----------|-------------------------------------------|
//! | `qdrant` | [`QdrantChunkStore`] on an external Qdrant |

pub mod citations;
pub mod config;
pub mod document_indexer;
pub mod embedder;
pub mod engine;
pub mod extract;
pub mod history;
pub mod memory;
pub mod prompts;
#[cfg(feature = "qdrant")]
pub mod qdrant_store;
pub mod splitter;
pub mod vector_store;


pub use citations::{CitationParser, classify_outcome};
pub use config::{EmbedderKind, RagConfig, SessionStoreKind};
pub use document_indexer::IngestionPipeline;
pub use embedder::{DEFAULT_EMBEDDING_DIM, HashEmbedder, OllamaEmbedder};
pub use engine::{CancelHandle, CancelSignal, EmptyEvidencePolicy, EngineConfig, MAX_TOP_K, RagEngine, Stage};
pub use extract::{PageText, SourceFormat, extract_pages};
pub use history::{FullHistory, HistoryPolicy, SummarizingHistory};
pub use memory::{FileSessionStore, InMemorySessionStore};
pub use prompts::{GROUNDING_POLICY, NO_CONTEXT_MARKER, REFUSAL_SENTENCE, assemble_prompt};
#[cfg(feature = "qdrant")]
pub use qdrant_store::QdrantChunkStore;
pub use splitter::RecursiveSplitter;
pub use vector_store::{LocalChunkStore, cosine_distance};

// Re-export core types for convenience
pub use quill_core::{
    Chunk, ChunkStore, DocumentIndexer, Embedder, Error, IngestionReport, Outcome, QueryEngine, RagAnswer, RagQuery,
    Result, RetrievedEvidence, SessionStore,
};
