//! HTTP embedding providers.
//!
//! Concrete implementations of [`docqa_core::embedding::EmbeddingProvider`]:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use docqa::config::EmbeddingConfig;
//! # use docqa::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! Embedding is idempotent, so both HTTP providers retry transient errors
//! with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Texts are sent in batches of `embedding.batch_size`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use docqa_core::embedding::EmbeddingProvider;
use docqa_core::{QaError, QaResult};

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn embed(&self, _texts: &[String]) -> QaResult<Vec<Vec<f32>>> {
        Err(QaError::backend("embedding provider is disabled"))
    }
}

// ============ Shared HTTP plumbing ============

/// Request settings shared by the HTTP providers.
struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
    max_retries: u32,
    label: &'static str,
}

impl HttpEmbedder {
    fn new(
        config: &EmbeddingConfig,
        endpoint: String,
        api_key: Option<String>,
        label: &'static str,
    ) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", label))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            label,
        })
    }

    /// Embed all `texts`, batch by batch, parsing each reply with `parse`.
    async fn embed_all(
        &self,
        texts: &[String],
        parse: fn(&serde_json::Value) -> QaResult<Vec<Vec<f32>>>,
    ) -> QaResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let json = self.post_with_retry(batch).await?;
            let vectors = parse(&json)?;
            if vectors.len() != batch.len() {
                return Err(QaError::backend(format!(
                    "{} returned {} embeddings for {} inputs",
                    self.label,
                    vectors.len(),
                    batch.len()
                )));
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    async fn post_with_retry(&self, batch: &[String]) -> QaResult<serde_json::Value> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(provider = self.label, attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(QaError::backend);
                    }

                    // Rate limited or server error: retry
                    let body_text = response.text().await.unwrap_or_default();
                    let err = QaError::backend(format!(
                        "{} API error {}: {}",
                        self.label, status, body_text
                    ));
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(provider = self.label, %status, "transient embedding error");
                        last_err = Some(err);
                        continue;
                    }

                    // Client error (not 429): fail now
                    return Err(err);
                }
                Err(e) => {
                    warn!(provider = self.label, error = %e, "embedding request failed");
                    last_err = Some(QaError::backend(format!(
                        "{} connection error ({}): {}",
                        self.label, self.endpoint, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| QaError::backend("embedding failed after retries")))
    }
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (or any server exposing the
/// same `POST /v1/embeddings` contract).
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    dims: usize,
    http: HttpEmbedder,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        // Verify API key is available
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        let endpoint = format!("{}/v1/embeddings", base.trim_end_matches('/'));
        Ok(Self {
            dims,
            http: HttpEmbedder::new(config, endpoint, Some(api_key), "OpenAI")?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> QaResult<Vec<Vec<f32>>> {
        self.http.embed_all(texts, parse_openai_response).await
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> QaResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| QaError::backend("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| QaError::backend("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_to_vec(embedding)));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    dims: usize,
    http: HttpEmbedder,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        let endpoint = format!("{}/api/embed", base.trim_end_matches('/'));
        Ok(Self {
            dims,
            http: HttpEmbedder::new(config, endpoint, None, "Ollama")?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> QaResult<Vec<Vec<f32>>> {
        self.http.embed_all(texts, parse_ollama_response).await
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> QaResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| QaError::backend("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_to_vec(values))
                .ok_or_else(|| QaError::backend("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_orders_by_index() {
        let body = json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&body).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        let err = parse_openai_response(&json!({"error": "nope"})).unwrap_err();
        assert!(matches!(err, QaError::TransientBackend(_)));
    }

    #[test]
    fn test_parse_ollama() {
        let body = json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let vecs = parse_ollama_response(&body).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ollama_rejects_non_array() {
        assert!(parse_ollama_response(&json!({"embeddings": ["x"]})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert!(!provider.is_enabled());
        assert!(provider.embed(&["hi".to_string()]).await.is_err());
    }

    #[test]
    fn test_ollama_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            dims: Some(768),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
