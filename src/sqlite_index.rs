//! SQLite-backed [`Index`] implementation.
//!
//! Chunks live in the `chunks` table with their embedding stored as a
//! little-endian f32 BLOB. Each [`Index::append`] batch is written in a
//! single transaction, so concurrent readers (WAL mode) see all of it or
//! none of it.
//!
//! Similarity search is brute-force cosine over every stored embedding.
//! Filter search scans chunks in insertion order and matches the Unicode
//! lowercase of each chunk's text in Rust, since SQLite's `lower()` folds
//! ASCII letters only.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docqa_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docqa_core::index::{Index, TextFilter};
use docqa_core::models::{Chunk, Metadata, ScoredChunk};
use docqa_core::{QaError, QaResult};

/// SQLite implementation of the [`Index`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_chunk(row: &SqliteRow) -> QaResult<Chunk> {
    let blob: Vec<u8> = row.try_get("embedding").map_err(QaError::index)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(QaError::index)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(QaError::index)?;
    Ok(Chunk {
        id: row.try_get("id").map_err(QaError::index)?,
        content: row.try_get("content").map_err(QaError::index)?,
        hash: row.try_get("hash").map_err(QaError::index)?,
        embedding: blob_to_vec(&blob),
        metadata,
    })
}

#[async_trait]
impl Index for SqliteIndex {
    async fn similarity_search(&self, vector: &[f32], n: usize) -> QaResult<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, content, hash, embedding, metadata_json FROM chunks ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(QaError::index)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            scored.push(ScoredChunk {
                similarity: cosine_similarity(vector, &chunk.embedding),
                chunk,
            });
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(n);

        Ok(scored)
    }

    async fn filter_search(&self, filter: &TextFilter, n: usize) -> QaResult<Vec<Chunk>> {
        let empty = match filter {
            TextFilter::Phrase(p) => p.is_empty(),
            TextFilter::AllTokens(tokens) => tokens.is_empty() || tokens.iter().any(String::is_empty),
        };
        if empty || n == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, content, hash, embedding, metadata_json FROM chunks ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(QaError::index)?;

        let mut hits = Vec::new();
        for row in &rows {
            let content: String = row.try_get("content").map_err(QaError::index)?;
            if !filter.matches_lowercase(&content.to_lowercase()) {
                continue;
            }
            hits.push(row_to_chunk(row)?);
            if hits.len() == n {
                break;
            }
        }
        Ok(hits)
    }

    async fn append(&self, chunks: Vec<Chunk>) -> QaResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(QaError::index)?;

        for chunk in &chunks {
            let metadata_json =
                serde_json::to_string(&chunk.metadata).map_err(QaError::index)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, content, hash, embedding, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.content)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(QaError::index)?;
        }

        tx.commit().await.map_err(QaError::index)?;
        Ok(())
    }

    async fn count(&self) -> QaResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(QaError::index)?;
        Ok(count as usize)
    }
}
