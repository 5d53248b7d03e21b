//! Document ingestion pipeline.
//!
//! Coordinates the upload flow: staging → extraction → front-matter
//! removal → chunking → embedding → index append → relocation.
//!
//! # Pipeline
//!
//! ```text
//! bytes ─▶ staging_dir/filename
//!       ─▶ TextExtractor (blocking pool)
//!       ─▶ assemble_pages (drop TOC / revision pages, "--- Page N ---")
//!       ─▶ split_text (chunking.size / chunking.overlap chars)
//!       ─▶ EmbeddingProvider::embed
//!       ─▶ [write lock] Index::append [release]
//!       ─▶ move staging_dir/filename → corpus_dir/filename
//! ```
//!
//! The write lock is held only around the append. Extraction and embedding
//! run outside it, and retrieval never takes it.
//!
//! A failed move after a successful append is logged and reported as
//! `moved = false`; the chunks are already stored, so ingestion still
//! succeeds.
//!
//! Every chunk's `source` is the absolute path the file is moved to,
//! `corpus_dir/filename`. Document fields reported by the extractor (PDF
//! title, author, ...) are copied into each chunk's metadata.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use walkdir::WalkDir;

use docqa_core::boilerplate::{assemble_pages, BoilerplateRules};
use docqa_core::chunk::{build_chunks, split_text};
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::index::Index;
use docqa_core::models::Metadata;
use docqa_core::{QaError, QaResult};

use crate::config::Config;
use crate::extract::TextExtractor;

/// Directories and chunking knobs.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub staging_dir: PathBuf,
    pub corpus_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub rules: BoilerplateRules,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_dir: config.ingestion.staging_dir.clone(),
            corpus_dir: config.ingestion.corpus_dir.clone(),
            chunk_size: config.chunking.size,
            chunk_overlap: config.chunking.overlap,
            rules: config.ingestion.rules(),
        }
    }
}

/// Result of ingesting one file.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub filename: String,
    pub chunks: usize,
    pub pages_total: usize,
    pub pages_kept: usize,
    /// `false` when the file could not be moved into the corpus directory.
    pub moved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub filename: String,
    pub error: String,
}

/// Per-file results of [`IngestPipeline::ingest_staged`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchReport {
    pub ingested: Vec<IngestOutcome>,
    /// Files already present in the corpus directory.
    pub skipped: Vec<String>,
    pub failed: Vec<FileFailure>,
}

pub struct IngestPipeline {
    index: Arc<dyn Index>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn TextExtractor>,
    settings: IngestSettings,
    write_lock: Mutex<()>,
}

/// Reject names that could escape the staging directory.
pub fn validate_filename(filename: &str) -> QaResult<()> {
    let bad = filename.trim().is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0'])
        || Path::new(filename).file_name().and_then(|n| n.to_str()) != Some(filename);
    if bad {
        return Err(QaError::validation(format!("invalid filename: {:?}", filename)));
    }
    Ok(())
}

impl IngestPipeline {
    pub fn new(
        index: Arc<dyn Index>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn TextExtractor>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            extractor,
            settings,
            write_lock: Mutex::new(()),
        }
    }

    /// Stage, process, and relocate one uploaded file.
    pub async fn ingest(&self, bytes: Vec<u8>, filename: &str) -> QaResult<IngestOutcome> {
        validate_filename(filename)?;

        tokio::fs::create_dir_all(&self.settings.staging_dir)
            .await
            .map_err(|e| QaError::Internal(format!("cannot create staging dir: {}", e)))?;
        let staged = self.settings.staging_dir.join(filename);
        tokio::fs::write(&staged, &bytes)
            .await
            .map_err(|e| QaError::Internal(format!("cannot stage {}: {}", staged.display(), e)))?;

        self.process(bytes, filename).await
    }

    /// Ingest every staged file that is not yet in the corpus directory.
    ///
    /// Files are processed one by one in name order; a failure is recorded
    /// and the batch moves on.
    pub async fn ingest_staged(&self) -> QaResult<BatchReport> {
        let mut report = BatchReport::default();
        if !self.settings.staging_dir.is_dir() {
            return Ok(report);
        }

        let mut names: Vec<String> = WalkDir::new(&self.settings.staging_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();

        for name in names {
            if self.settings.corpus_dir.join(&name).exists() {
                report.skipped.push(name);
                continue;
            }
            let result = match tokio::fs::read(self.settings.staging_dir.join(&name)).await {
                Ok(bytes) => self.process(bytes, &name).await,
                Err(e) => Err(QaError::Internal(format!("cannot read {}: {}", name, e))),
            };
            match result {
                Ok(outcome) => report.ingested.push(outcome),
                Err(e) => {
                    warn!(file = %name, error = %e, "ingestion failed");
                    report.failed.push(FileFailure {
                        filename: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "staged ingestion finished"
        );
        Ok(report)
    }

    async fn process(&self, bytes: Vec<u8>, filename: &str) -> QaResult<IngestOutcome> {
        let extractor = self.extractor.clone();
        let name = filename.to_string();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &name))
            .await
            .map_err(|e| QaError::Internal(format!("extraction task failed: {}", e)))??;

        let pages_total = extracted.pages.len();
        let (text, pages_kept) = assemble_pages(&extracted.pages, &self.settings.rules);
        if text.trim().is_empty() {
            return Err(QaError::extraction(format!(
                "no text left in {} after removing front matter",
                filename
            )));
        }

        let pieces = split_text(&text, self.settings.chunk_size, self.settings.chunk_overlap);
        let embeddings = self.embedder.embed(&pieces).await?;
        if embeddings.len() != pieces.len() {
            return Err(QaError::backend(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                pieces.len()
            )));
        }

        let source = std::path::absolute(self.settings.corpus_dir.join(filename))
            .map_err(|e| QaError::Internal(format!("cannot resolve corpus path: {}", e)))?;

        let mut base: Metadata = extracted.metadata;
        base.insert(
            "source".into(),
            Value::from(source.to_string_lossy().into_owned()),
        );
        base.insert("filename".into(), Value::from(filename));
        base.insert("content_type".into(), Value::from(extracted.content_type));
        base.insert("page_count".into(), Value::from(pages_total));
        base.insert("pages_kept".into(), Value::from(pages_kept));
        base.insert(
            "ingested_at".into(),
            Value::from(chrono::Utc::now().to_rfc3339()),
        );
        let chunks = build_chunks(pieces, embeddings, &base);
        let count = chunks.len();

        {
            let _guard = self.write_lock.lock().await;
            self.index.append(chunks).await?;
        }

        let moved = self.relocate(filename).await;
        info!(
            file = %filename,
            chunks = count,
            pages_total,
            pages_kept,
            moved,
            "ingested document"
        );

        Ok(IngestOutcome {
            filename: filename.to_string(),
            chunks: count,
            pages_total,
            pages_kept,
            moved,
        })
    }

    /// Move the staged file into the corpus directory. Never fails the ingest.
    async fn relocate(&self, filename: &str) -> bool {
        let from = self.settings.staging_dir.join(filename);
        let to = self.settings.corpus_dir.join(filename);

        let result = async {
            tokio::fs::create_dir_all(&self.settings.corpus_dir).await?;
            if tokio::fs::rename(&from, &to).await.is_err() {
                // Cross-device moves need a copy.
                tokio::fs::copy(&from, &to).await?;
                tokio::fs::remove_file(&from).await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    "could not move ingested file into the corpus"
                );
                false
            }
        }
    }
}
