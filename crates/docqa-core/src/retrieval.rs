//! Hybrid retrieval engine.
//!
//! Selects the most relevant stored chunks for a query in one of two
//! modes, chosen per request:
//!
//! | Mode | Algorithm |
//! |------|-----------|
//! | [`Similarity`](RetrievalMode::Similarity) | embed → nearest `fetch_n` → re-rank by metadata score → top `k` |
//! | [`Keyword`](RetrievalMode::Keyword) | exact phrase → all tokens → similarity fallback → top `k` |
//!
//! # Similarity Mode
//!
//! The query is embedded and the index returns the `fetch_n` nearest chunks
//! by cosine similarity. `fetch_n` is normally wider than `k`; the optional
//! re-rank step then reorders the candidates by a secondary score
//! (`rerank_field` in chunk metadata, sorted descending, missing = 0). The
//! sort is stable, so ties keep their similarity order.
//!
//! # Keyword Mode
//!
//! A three-tier fallback against raw chunk text, case-insensitive:
//!
//! 1. chunks containing the whole query verbatim;
//! 2. if none, chunks containing every whitespace-delimited query token;
//! 3. if still none, the similarity-mode selection.
//!
//! Tiers 1 and 2 return chunks in index insertion order. Tier 3 is skipped
//! (no results) when the embedder is disabled.
//!
//! # Source Resolution
//!
//! [`Retriever::retrieve`] maps chunks to [`SourceRef`]s. Relative `source`
//! paths are joined onto the corpus root; chunks without a `source` field
//! report `<corpus_root>/unknown`. Duplicate sources are not collapsed.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{QaError, QaResult};
use crate::index::{Index, TextFilter};
use crate::models::{Chunk, SourceRef};

/// Source name reported for chunks that carry no `source` metadata.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Per-request selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Similarity,
    Keyword,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Similarity => f.write_str("similarity"),
            RetrievalMode::Keyword => f.write_str("keyword"),
        }
    }
}

impl FromStr for RetrievalMode {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "similarity" | "vector" => Ok(RetrievalMode::Similarity),
            "keyword" | "words" => Ok(RetrievalMode::Keyword),
            other => Err(QaError::validation(format!(
                "unknown retrieval mode '{other}' (expected similarity or keyword)"
            ))),
        }
    }
}

/// Breadth and ranking knobs.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Candidates fetched from the index before re-ranking.
    pub fetch_n: usize,
    /// Result count when the caller does not give one.
    pub default_k: usize,
    /// Numeric metadata field used to re-rank similarity candidates.
    pub rerank_field: Option<String>,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            fetch_n: 20,
            default_k: 5,
            rerank_field: Some("score".to_string()),
        }
    }
}

/// Query-time view over an [`Index`] and an [`EmbeddingProvider`].
///
/// Holds no lock of its own: it only reads from the index, so it can run
/// concurrently with ingestion.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn Index>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
    corpus_root: PathBuf,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn Index>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
        corpus_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index,
            embedder,
            params,
            corpus_root: corpus_root.into(),
        }
    }

    /// Whether similarity search is available.
    pub fn can_embed(&self) -> bool {
        self.embedder.is_enabled()
    }

    /// Select at most `k` chunks for `query` (`None` = `default_k`).
    pub async fn select(
        &self,
        query: &str,
        mode: RetrievalMode,
        k: Option<usize>,
    ) -> QaResult<Vec<Chunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QaError::validation("query must not be empty"));
        }
        let k = k.unwrap_or(self.params.default_k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut chunks = match mode {
            RetrievalMode::Similarity => self.select_similar(query).await?,
            RetrievalMode::Keyword => self.select_keyword(query, k).await?,
        };
        chunks.truncate(k);
        Ok(chunks)
    }

    /// Like [`select`](Self::select) but returns resolved source references.
    pub async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        k: Option<usize>,
    ) -> QaResult<Vec<SourceRef>> {
        let chunks = self.select(query, mode, k).await?;
        Ok(chunks
            .into_iter()
            .map(|c| SourceRef {
                source_path: self.resolve_source(c.source()),
                metadata: c.metadata,
            })
            .collect())
    }

    /// Join a relative `source` onto the corpus root.
    pub fn resolve_source(&self, source: Option<&str>) -> PathBuf {
        match source.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) if Path::new(s).is_absolute() => PathBuf::from(s),
            Some(s) => self.corpus_root.join(s),
            None => self.corpus_root.join(UNKNOWN_SOURCE),
        }
    }

    async fn select_similar(&self, query: &str) -> QaResult<Vec<Chunk>> {
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let scored = self
            .index
            .similarity_search(&vector, self.params.fetch_n)
            .await?;
        let mut chunks: Vec<Chunk> = scored.into_iter().map(|s| s.chunk).collect();
        if let Some(field) = &self.params.rerank_field {
            rerank_by_field(&mut chunks, field);
        }
        Ok(chunks)
    }

    async fn select_keyword(&self, query: &str, k: usize) -> QaResult<Vec<Chunk>> {
        let phrase = TextFilter::Phrase(query.to_lowercase());
        let hits = self.index.filter_search(&phrase, k).await?;
        if !hits.is_empty() {
            return Ok(hits);
        }

        let tokens = TextFilter::all_tokens(query);
        let hits = self.index.filter_search(&tokens, k).await?;
        if !hits.is_empty() || !self.can_embed() {
            return Ok(hits);
        }

        self.select_similar(query).await
    }
}

fn metadata_score(chunk: &Chunk, field: &str) -> f64 {
    chunk
        .metadata
        .get(field)
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Stable descending sort by a numeric metadata field.
pub fn rerank_by_field(chunks: &mut [Chunk], field: &str) {
    chunks.sort_by(|a, b| {
        metadata_score(b, field)
            .partial_cmp(&metadata_score(a, field))
            .unwrap_or(Ordering::Equal)
    });
}
