//! In-memory [`Index`] implementation for tests and embedded use.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`. Appends take the write
//! lock once per batch, so readers observe whole batches only. Vector search
//! is brute-force cosine similarity over all stored chunks.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{QaError, QaResult};
use crate::models::{Chunk, ScoredChunk};

use super::{Index, TextFilter};

/// In-memory chunk index.
pub struct InMemoryIndex {
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Build an index pre-populated with `chunks`.
    pub fn with_chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: RwLock::new(chunks),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> QaError {
    QaError::index("in-memory index lock poisoned")
}

#[async_trait]
impl Index for InMemoryIndex {
    async fn similarity_search(&self, vector: &[f32], n: usize) -> QaResult<Vec<ScoredChunk>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .map(|c| ScoredChunk {
                similarity: cosine_similarity(vector, &c.embedding),
                chunk: c.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(n);
        Ok(scored)
    }

    async fn filter_search(&self, filter: &TextFilter, n: usize) -> QaResult<Vec<Chunk>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks
            .iter()
            .filter(|c| filter.matches_lowercase(&c.content.to_lowercase()))
            .take(n)
            .cloned()
            .collect())
    }

    async fn append(&self, batch: Vec<Chunk>) -> QaResult<()> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        chunks.extend(batch);
        Ok(())
    }

    async fn count(&self) -> QaResult<usize> {
        Ok(self.chunks.read().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::make_chunk;
    use crate::models::Metadata;

    fn chunk(text: &str, vector: Vec<f32>) -> Chunk {
        make_chunk(text.to_string(), vector, Metadata::new())
    }

    #[tokio::test]
    async fn similarity_orders_best_first() {
        let index = InMemoryIndex::with_chunks(vec![
            chunk("far", vec![0.0, 1.0]),
            chunk("near", vec![1.0, 0.1]),
            chunk("exact", vec![1.0, 0.0]),
        ]);
        let hits = index.similarity_search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.content, "exact");
        assert_eq!(hits[1].chunk.content, "near");
    }

    #[tokio::test]
    async fn filter_is_case_insensitive_and_ordered() {
        let index = InMemoryIndex::new();
        index
            .append(vec![
                chunk("The Central Architecture", vec![]),
                chunk("unrelated", vec![]),
                chunk("central architecture again", vec![]),
            ])
            .await
            .unwrap();
        let hits = index
            .filter_search(&TextFilter::Phrase("central architecture".into()), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "The Central Architecture");
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn filter_respects_limit() {
        let index = InMemoryIndex::with_chunks(
            (0..5).map(|i| chunk(&format!("doc {i}"), vec![])).collect(),
        );
        let hits = index.filter_search(&TextFilter::all_tokens("doc"), 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }
}
