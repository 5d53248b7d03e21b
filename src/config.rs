//! Configuration parsing and validation.
//!
//! docqa is configured via a TOML file (default: `config/docqa.toml`).
//! Every section except `[db]` is optional and falls back to the defaults
//! shown below.
//!
//! # Example Configuration
//!
//! ```toml
//! [db]
//! path = "./data/docqa.sqlite"
//!
//! [chunking]
//! size = 20000
//! overlap = 2000
//!
//! [retrieval]
//! fetch_n = 20
//! default_k = 5
//! context_docs = 2
//! rerank_field = "score"
//! # corpus_root defaults to ingestion.corpus_dir
//!
//! [ingestion]
//! staging_dir = "./uploads"
//! corpus_dir = "./data"
//!
//! [embedding]
//! provider = "ollama"          # "disabled" | "openai" | "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [generation]
//! provider = "openai-compatible"   # "openai-compatible" | "echo"
//! url = "http://localhost:8080"
//! instances = 1
//!
//! [queue]
//! workers = 1
//! capacity = 0                 # 0 = unbounded
//! backpressure = "reject"      # "reject" | "block"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects:
//! - `chunking.size == 0` or `chunking.overlap * 2 >= chunking.size`
//! - `retrieval.default_k < 1` or `retrieval.fetch_n < retrieval.default_k`
//! - `queue.workers < 1`, `generation.instances < 1`, `generation.history_budget < 1`
//! - `ingestion.dotted_line_ratio` outside `[0.0, 1.0]`
//! - missing `embedding.model` / `embedding.dims` when embeddings are enabled
//! - unknown embedding or generation providers

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docqa_core::boilerplate::BoilerplateRules;
use docqa_core::retrieval::RetrievalParams;

use crate::queue::{Backpressure, QueueConfig};

/// Default instruction stored as each session's system turn.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a highly helpful assistant, and your name is \
llama_chat. Your answers will be concise and direct. If the provided context lacks relevant \
information, you may answer without it.";

/// Top-level configuration, one field per TOML section.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Character-based chunk window.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    20_000
}
fn default_chunk_overlap() -> usize {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_fetch_n")]
    pub fetch_n: usize,
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Chunks handed to the generator on each chat turn.
    #[serde(default = "default_context_docs")]
    pub context_docs: usize,
    #[serde(default = "default_rerank_field")]
    pub rerank_field: Option<String>,
    /// Root for relative chunk sources; defaults to `ingestion.corpus_dir`.
    #[serde(default)]
    pub corpus_root: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fetch_n: default_fetch_n(),
            default_k: default_k(),
            context_docs: default_context_docs(),
            rerank_field: default_rerank_field(),
            corpus_root: None,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            fetch_n: self.fetch_n,
            default_k: self.default_k,
            rerank_field: self.rerank_field.clone().filter(|f| !f.is_empty()),
        }
    }
}

fn default_fetch_n() -> usize {
    20
}
fn default_k() -> usize {
    5
}
fn default_context_docs() -> usize {
    2
}
fn default_rerank_field() -> Option<String> {
    Some("score".to_string())
}
fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: PathBuf,
    #[serde(default = "default_toc_keywords")]
    pub toc_keywords: Vec<String>,
    #[serde(default = "default_min_dotted_lines")]
    pub min_dotted_lines: usize,
    #[serde(default = "default_dotted_line_ratio")]
    pub dotted_line_ratio: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            corpus_dir: default_corpus_dir(),
            toc_keywords: default_toc_keywords(),
            min_dotted_lines: default_min_dotted_lines(),
            dotted_line_ratio: default_dotted_line_ratio(),
        }
    }
}

impl IngestionConfig {
    pub fn rules(&self) -> BoilerplateRules {
        BoilerplateRules {
            toc_keywords: self.toc_keywords.clone(),
            min_dotted_lines: self.min_dotted_lines,
            dotted_line_ratio: self.dotted_line_ratio,
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_toc_keywords() -> Vec<String> {
    vec!["table of contents".to_string()]
}
fn default_min_dotted_lines() -> usize {
    3
}
fn default_dotted_line_ratio() -> f64 {
    0.30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`) or an
    /// OpenAI-compatible server (default `https://api.openai.com`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Independent backend instances, each with its own serializer.
    #[serde(default = "default_one")]
    pub instances: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Turn budget for the windowed history (system turn included).
    #[serde(default = "default_history_budget")]
    pub history_budget: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            url: default_generation_url(),
            model: None,
            instances: 1,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            history_budget: default_history_budget(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_generation_provider() -> String {
    "openai-compatible".to_string()
}
fn default_generation_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_one() -> usize {
    1
}
fn default_temperature() -> f32 {
    0.01
}
fn default_max_tokens() -> u32 {
    512
}
fn default_generation_timeout() -> u64 {
    300
}
fn default_history_budget() -> usize {
    15
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

/// `[queue]` section. `capacity = 0` means unbounded.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueSection {
    #[serde(default = "default_one")]
    pub workers: usize,
    #[serde(default)]
    pub capacity: usize,
    #[serde(default)]
    pub backpressure: Backpressure,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            workers: 1,
            capacity: 0,
            backpressure: Backpressure::default(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl QueueSection {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            capacity: (self.capacity > 0).then_some(self.capacity),
            backpressure: self.backpressure,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

fn default_shutdown_grace() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Directory relative chunk sources are resolved against.
    pub fn corpus_root(&self) -> &Path {
        self.retrieval
            .corpus_root
            .as_deref()
            .unwrap_or(&self.ingestion.corpus_dir)
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap * 2 >= config.chunking.size {
        anyhow::bail!("chunking.overlap must be less than half of chunking.size");
    }

    // Retrieval
    if config.retrieval.default_k < 1 {
        anyhow::bail!("retrieval.default_k must be >= 1");
    }
    if config.retrieval.fetch_n < config.retrieval.default_k {
        anyhow::bail!("retrieval.fetch_n must be >= retrieval.default_k");
    }

    if !(0.0..=1.0).contains(&config.ingestion.dotted_line_ratio) {
        anyhow::bail!("ingestion.dotted_line_ratio must be in [0.0, 1.0]");
    }

    // Workers and generation
    if config.queue.workers < 1 {
        anyhow::bail!("queue.workers must be >= 1");
    }
    if config.generation.instances < 1 {
        anyhow::bail!("generation.instances must be >= 1");
    }
    if config.generation.history_budget < 1 {
        anyhow::bail!("generation.history_budget must be >= 1");
    }
    match config.generation.provider.as_str() {
        "openai-compatible" | "echo" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be openai-compatible or echo.",
            other
        ),
    }

    // Embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
