//! Embedder trait

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::Result;

/// Embedding requests a batch keeps in flight at once
pub const EMBED_CONCURRENCY: usize = 8;

/// Fixed-dimension text embedding function.
///
/// Every vector returned by one embedder has length [`Embedder::dimension`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order, with at most
    /// [`EMBED_CONCURRENCY`] requests outstanding
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<_> = texts.iter().map(|t| self.embed(t)).collect();
        stream::iter(requests)
            .buffered(EMBED_CONCURRENCY)
            .try_collect()
            .await
    }
}
