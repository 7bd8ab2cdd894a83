//! Core traits and types for Quill
//!
//! This crate defines the capability-facing interfaces of the grounded
//! question-answering pipeline: embedders, chunk stores, session stores,
//! document indexers and the generation gateway, together with the shared
//! domain types. Implementations live in `quill-rag` and `quill-llm`.

pub mod document_indexer;
pub mod embedder;
pub mod error;
pub mod llm;
pub mod rag;
pub mod session;
pub mod types;
pub mod vector_store;

pub use document_indexer::{DocumentIndexer, IndexingConfig, IngestionReport};
pub use embedder::{EMBED_CONCURRENCY, Embedder};
pub use error::{Error, ErrorKind, Result};
pub use llm::{CompletionGateway, CompletionRequest, ProviderKind};
pub use rag::{DEFAULT_MODEL, DEFAULT_TOP_K, Outcome, QueryEngine, RagAnswer, RagQuery};
pub use session::SessionStore;
pub use types::*;
pub use vector_store::{ChunkStore, StoredDocument};
