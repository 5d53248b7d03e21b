//! Document index abstraction.
//!
//! The [`Index`] trait is the one seam between the retrieval engine, the
//! ingestion pipeline, and the storage backend (SQLite in the app crate,
//! [`memory::InMemoryIndex`] for tests).
//!
//! # Consistency
//!
//! [`append`](Index::append) must be atomic with respect to every query:
//! a concurrent reader sees either none or all of the appended chunks, and
//! never a chunk whose embedding or metadata is only partly written.
//! Implementations must be `Send + Sync`.

pub mod memory;

use async_trait::async_trait;

use crate::error::QaResult;
use crate::models::{Chunk, ScoredChunk};

/// Raw-text predicate for [`Index::filter_search`].
///
/// Matching is case-insensitive. Callers pass lowercase needles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextFilter {
    /// The chunk contains the whole phrase verbatim.
    Phrase(String),
    /// The chunk contains every token (in any order, anywhere).
    AllTokens(Vec<String>),
}

impl TextFilter {
    /// Build an [`AllTokens`](TextFilter::AllTokens) filter from whitespace-delimited text.
    pub fn all_tokens(text: &str) -> Self {
        TextFilter::AllTokens(
            text.to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        )
    }

    /// Evaluate the filter against already-lowercased text.
    pub fn matches_lowercase(&self, haystack: &str) -> bool {
        match self {
            TextFilter::Phrase(p) => !p.is_empty() && haystack.contains(p.as_str()),
            TextFilter::AllTokens(tokens) => {
                !tokens.is_empty() && tokens.iter().all(|t| haystack.contains(t.as_str()))
            }
        }
    }
}

/// Abstract storage backend for document chunks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`similarity_search`](Index::similarity_search) | nearest chunks by cosine similarity |
/// | [`filter_search`](Index::filter_search) | chunks whose raw text matches a [`TextFilter`] |
/// | [`append`](Index::append) | atomically add a batch of chunks |
/// | [`count`](Index::count) | number of stored chunks |
#[async_trait]
pub trait Index: Send + Sync {
    /// Top `n` chunks by similarity to `vector`, best first.
    async fn similarity_search(&self, vector: &[f32], n: usize) -> QaResult<Vec<ScoredChunk>>;

    /// Up to `n` chunks matching `filter`, in insertion order.
    async fn filter_search(&self, filter: &TextFilter, n: usize) -> QaResult<Vec<Chunk>>;

    /// Append a batch of chunks. All-or-nothing, visible atomically.
    async fn append(&self, chunks: Vec<Chunk>) -> QaResult<()>;

    async fn count(&self) -> QaResult<usize>;
}
