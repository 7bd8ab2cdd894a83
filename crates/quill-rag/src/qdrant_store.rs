//! Chunk store backed by a Qdrant collection

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder,
    PointId, PointStruct, Range, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use quill_core::{Chunk, ChunkStore, Embedder, Error, Result, RetrievedEvidence, StoredDocument};

const SCROLL_PAGE: u32 = 256;

fn store_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::ChunkStore(format!("{}: {}", context, err))
}

/// Deterministic point id for a chunk id
pub fn point_id(chunk_id: &str) -> String {
    Uuid::from_bytes(md5::compute(chunk_id.as_bytes()).0).to_string()
}

fn string_field(payload: &HashMap<String, Value>, key: &str) -> String {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        _ => String::new(),
    }
}

fn integer_field(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => Some(*i),
        Some(Kind::DoubleValue(d)) => Some(*d as i64),
        _ => None,
    }
}

/// Insertion sequence for each chunk: chunks already stored keep theirs,
/// new ones count up from `base`.
fn assign_sequence(chunks: &[Chunk], existing: &HashMap<String, i64>, base: i64) -> Vec<i64> {
    let mut next = base;
    chunks
        .iter()
        .map(|chunk| match existing.get(&chunk.chunk_id) {
            Some(seq) => *seq,
            None => {
                let seq = next;
                next += 1;
                seq
            }
        })
        .collect()
}

/// Chunk store on an external Qdrant service.
///
/// Vectors live in a cosine collection; similarity is reported back as
/// distance (`1 - similarity`).
pub struct QdrantChunkStore {
    client: Qdrant,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl QdrantChunkStore {
    /// Connect and create the collection if it does not exist yet
    pub async fn connect(url: &str, collection: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build Qdrant client for {}: {}", url, e)))?;

        let exists = client
            .collection_exists(collection)
            .await
            .map_err(|e| store_error("Failed to list Qdrant collections", e))?;
        if !exists {
            client
                .create_collection(
                    CreateCollectionBuilder::new(collection)
                        .vectors_config(VectorParamsBuilder::new(embedder.dimension() as u64, Distance::Cosine)),
                )
                .await
                .map_err(|e| store_error("Failed to create Qdrant collection", e))?;
            info!(collection, "created qdrant collection");
        }

        Ok(Self {
            client,
            collection: collection.to_string(),
            embedder,
        })
    }

    fn to_point(&self, chunk: Chunk, seq: i64) -> Result<PointStruct> {
        let payload = Payload::try_from(json!({
            "chunk_id": chunk.chunk_id,
            "doc_id": chunk.doc_id,
            "title": chunk.title,
            "chunk_index": chunk.chunk_index,
            "page": chunk.page,
            "text": chunk.text,
            "seq": seq,
        }))
        .map_err(|e| store_error("Failed to build point payload", e))?;
        Ok(PointStruct::new(point_id(&chunk.chunk_id), chunk.embedding, payload))
    }

    /// `seq` of the chunks that are already stored, by chunk id
    async fn stored_sequence(&self, chunks: &[Chunk]) -> Result<HashMap<String, i64>> {
        let ids: Vec<PointId> = chunks.iter().map(|c| PointId::from(point_id(&c.chunk_id))).collect();
        let response = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, ids).with_payload(true).with_vectors(false))
            .await
            .map_err(|e| store_error("Failed to read existing points", e))?;

        Ok(response
            .result
            .iter()
            .filter_map(|point| {
                integer_field(&point.payload, "seq").map(|seq| (string_field(&point.payload, "chunk_id"), seq))
            })
            .collect())
    }

    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<()> {
        let expected = self.embedder.dimension();
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
            return Err(Error::ChunkStore(format!(
                "chunk {} has a {}-dimensional embedding, expected {}",
                bad.chunk_id,
                bad.embedding.len(),
                expected
            )));
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let existing = self.stored_sequence(&chunks).await?;
        let base = chrono::Utc::now().timestamp_micros() * 1000;
        let sequence = assign_sequence(&chunks, &existing, base);
        let points = chunks
            .into_iter()
            .zip(sequence)
            .map(|(chunk, seq)| self.to_point(chunk, seq))
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| store_error("Failed to upsert points", e))?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for QdrantChunkStore {
    async fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        self.upsert(chunks).await
    }

    /// Upserts the new chunk set, then trims the indices beyond it. Chunk ids
    /// collide deterministically, so at no point is the document missing.
    async fn replace_document(&self, doc_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        let len = chunks.len();
        self.upsert(chunks).await?;

        let stale = Filter::must([
            Condition::matches("doc_id", doc_id.to_string()),
            Condition::range(
                "chunk_index",
                Range {
                    gte: Some(len as f64),
                    ..Default::default()
                },
            ),
        ]);
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(stale).wait(true))
            .await
            .map_err(|e| store_error("Failed to delete stale points", e))?;
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<RetrievedEvidence>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(text).await?;

        let response = self
            .client
            .search_points(SearchPointsBuilder::new(&self.collection, vector, top_k as u64).with_payload(true))
            .await
            .map_err(|e| store_error("Qdrant search failed", e))?;

        let mut scored: Vec<(f32, i64, RetrievedEvidence)> = response
            .result
            .into_iter()
            .map(|point| {
                let distance = 1.0 - point.score;
                let seq = integer_field(&point.payload, "seq").unwrap_or(i64::MAX);
                let evidence = RetrievedEvidence {
                    doc_id: string_field(&point.payload, "doc_id"),
                    title: string_field(&point.payload, "title"),
                    chunk_index: integer_field(&point.payload, "chunk_index").unwrap_or(0) as usize,
                    page: integer_field(&point.payload, "page").map(|p| p as u32),
                    text: string_field(&point.payload, "text"),
                    score: distance,
                };
                (distance, seq, evidence)
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(scored.into_iter().map(|(_, _, e)| e).collect())
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| store_error("Qdrant count failed", e))?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn documents(&self) -> Result<Vec<StoredDocument>> {
        let mut seen: Vec<(i64, StoredDocument)> = Vec::new();
        let mut offset = None;

        loop {
            let mut request = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(id) = offset.take() {
                request = request.offset(id);
            }
            let page = self
                .client
                .scroll(request)
                .await
                .map_err(|e| store_error("Qdrant scroll failed", e))?;

            for point in &page.result {
                let doc_id = string_field(&point.payload, "doc_id");
                let seq = integer_field(&point.payload, "seq").unwrap_or(i64::MAX);
                match seen.iter_mut().find(|(_, d)| d.doc_id == doc_id) {
                    Some((first, doc)) => {
                        doc.chunks += 1;
                        *first = (*first).min(seq);
                    }
                    None => seen.push((
                        seq,
                        StoredDocument {
                            doc_id,
                            title: string_field(&point.payload, "title"),
                            chunks: 1,
                        },
                    )),
                }
            }

            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        seen.sort_by_key(|(seq, _)| *seq);
        Ok(seen.into_iter().map(|(_, d)| d).collect())
    }

    fn dimension(&self) -> usize {
        self.embedder.dimension()
    }
}
