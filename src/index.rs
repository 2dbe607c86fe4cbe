//! In-memory embedding index
//!
//! Holds one embedding per chunk and answers nearest-neighbor queries by
//! exhaustive cosine-similarity scan. The corpus is a single document of at
//! most a few hundred chunks, so a full scan is the intended design; an
//! approximate index would change ranking semantics for no gain at this size.

use crate::chunker::Chunk;
use crate::providers::Embedder;
use crate::usage::{CallKind, UsageTracker};
use tracing::{debug, warn};

/// Embedding slot for one chunk: either fully populated at the model's
/// dimension or explicitly failed, never partial.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEmbedding {
    Vector(Vec<f32>),
    Failed,
}

/// A retrieved chunk with its relevance score
#[derive(Debug, Clone, Copy)]
pub struct RetrievalResult<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
}

/// Immutable chunk + embedding store for one loaded document
#[derive(Debug)]
pub struct DocumentIndex {
    chunks: Vec<Chunk>,
    embeddings: Vec<ChunkEmbedding>,
    page_count: usize,
}

impl DocumentIndex {
    /// Embed all chunks in batches and build the index.
    ///
    /// A failed batch does not abort the build: its chunks get `Failed`
    /// embeddings and the remaining batches proceed. Usage from each
    /// successful batch is folded into the tracker as it arrives.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
        usage: &UsageTracker,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let mut embeddings = Vec::with_capacity(chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            match embedder.embed_batch(batch).await {
                Ok((vectors, counts)) => {
                    usage.record(CallKind::Embedding, embedder.model_name(), counts);
                    embeddings.extend(vectors.into_iter().map(ChunkEmbedding::Vector));
                    debug!(batch = batch_no, size = batch.len(), "Embedded batch");
                }
                Err(e) => {
                    warn!(batch = batch_no, error = %e, "Batch embedding failed, marking chunks");
                    embeddings
                        .extend(std::iter::repeat(ChunkEmbedding::Failed).take(batch.len()));
                }
            }
        }

        let page_count = chunks.iter().map(|c| c.page_number).max().unwrap_or(0);
        Self {
            chunks,
            embeddings,
            page_count,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn failed_embedding_count(&self) -> usize {
        self.embeddings
            .iter()
            .filter(|e| matches!(e, ChunkEmbedding::Failed))
            .count()
    }

    /// Rank all chunks against a query vector and return the top `k` whose
    /// score strictly exceeds `threshold`, highest first. Equal scores are
    /// broken by ascending chunk index.
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> Vec<RetrievalResult<'_>> {
        let mut scored: Vec<RetrievalResult<'_>> = self
            .chunks
            .iter()
            .zip(self.embeddings.iter())
            .map(|(chunk, embedding)| {
                let score = match embedding {
                    // A failed embedding is never similar to anything
                    ChunkEmbedding::Failed => 0.0,
                    ChunkEmbedding::Vector(v) => cosine_similarity(query, v),
                };
                RetrievalResult { chunk, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.index.cmp(&b.chunk.index))
        });

        scored
            .into_iter()
            .take(k)
            .filter(|r| r.score > threshold)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn from_parts(chunks: Vec<Chunk>, embeddings: Vec<ChunkEmbedding>) -> Self {
        let page_count = chunks.iter().map(|c| c.page_number).max().unwrap_or(0);
        Self {
            chunks,
            embeddings,
            page_count,
        }
    }
}

/// Cosine similarity: dot(a, b) / (|a| * |b|)
///
/// Returns 0 for mismatched lengths or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
