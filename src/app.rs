//! Application assembly.
//!
//! Wires the SQLite adapters, providers, chat engine, queue, and ingestion
//! pipeline from a [`Config`]. Both the CLI and the HTTP server start here.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;

use docqa_core::history::HistoryStore;
use docqa_core::index::Index;
use docqa_core::metrics::MetricsStore;
use docqa_core::retrieval::Retriever;

use crate::chat::{ChatEngine, ChatSettings};
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::extract::DocumentExtractor;
use crate::generation::create_serializers;
use crate::ingest::{IngestPipeline, IngestSettings};
use crate::migrate::migrate_pool;
use crate::queue::ChatQueue;
use crate::sqlite_history::SqliteHistoryStore;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_metrics::SqliteMetricsStore;

/// Everything a running docqa instance needs.
pub struct App {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub index: Arc<dyn Index>,
    pub history: Arc<dyn HistoryStore>,
    pub metrics: Arc<dyn MetricsStore>,
    pub retriever: Retriever,
    pub engine: Arc<ChatEngine>,
    pub queue: Arc<ChatQueue>,
    pub ingest: Arc<IngestPipeline>,
}

impl App {
    /// Open the database, run migrations, and start the worker pool.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn build(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate_pool(&pool).await?;

        let index: Arc<dyn Index> = Arc::new(SqliteIndex::new(pool.clone()));
        let history: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::new(pool.clone()));
        let metrics: Arc<dyn MetricsStore> = Arc::new(SqliteMetricsStore::new(pool.clone()));
        let embedder = create_provider(&config.embedding)?;

        let retriever = Retriever::new(
            index.clone(),
            embedder.clone(),
            config.retrieval.params(),
            config.corpus_root().to_path_buf(),
        );

        if config.retrieval.context_docs > 0 && !config.embedding.is_enabled() {
            warn!("embeddings are disabled; chat answers will not use retrieved context");
        }
        let engine = Arc::new(
            ChatEngine::new(
                history.clone(),
                retriever.clone(),
                ChatSettings {
                    system_prompt: config.generation.system_prompt.clone(),
                    history_budget: config.generation.history_budget,
                    context_docs: config.retrieval.context_docs,
                },
            )
            .with_metrics(metrics.clone()),
        );

        let serializers = create_serializers(&config.generation)?;
        let queue = Arc::new(ChatQueue::start(
            engine.clone(),
            serializers,
            config.queue.queue_config(),
        )?);

        let ingest = Arc::new(IngestPipeline::new(
            index.clone(),
            embedder,
            Arc::new(DocumentExtractor),
            IngestSettings::from_config(config),
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            pool,
            index,
            history,
            metrics,
            retriever,
            engine,
            queue,
            ingest,
        })
    }

    /// Drain the queue and close the pool.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.pool.close().await;
    }
}
