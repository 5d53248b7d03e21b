//! Generation backends and the per-instance serializer.
//!
//! A [`GenerationSerializer`] owns one backend instance and guarantees that
//! at most one [`GenerationBackend::complete`] call runs on it at any
//! instant, however many workers share it. Throughput scales by creating
//! more `(backend, serializer)` pairs via `generation.instances`.
//!
//! # Backends
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"openai-compatible"` | [`OpenAiCompatibleBackend`]: `POST {url}/v1/chat/completions` (llama-server, LM Studio, OpenAI) |
//! | `"echo"` | [`EchoBackend`]: answers with the question; for offline smoke tests |
//!
//! Generation is not idempotent, so nothing here retries.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use docqa_core::generation::GenerationBackend;
use docqa_core::models::{Role, Turn};
use docqa_core::{QaError, QaResult};

use crate::config::GenerationConfig;

/// Mutual-exclusion gate around one backend instance.
pub struct GenerationSerializer {
    backend: Arc<dyn GenerationBackend>,
    gate: Mutex<()>,
}

impl GenerationSerializer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            gate: Mutex::new(()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run one generation call and return the text with its latency.
    ///
    /// Waits for the gate first; the returned duration covers only the
    /// backend call. Dropping the returned future releases the gate.
    pub async fn generate(
        &self,
        system_context: &str,
        history: &[Turn],
    ) -> QaResult<(String, Duration)> {
        let _guard = self.gate.lock().await;
        let started = Instant::now();
        let text = self.backend.complete(system_context, history).await?;
        let elapsed = started.elapsed();
        debug!(
            backend = self.backend.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            "generation finished"
        );
        Ok((text, elapsed))
    }
}

// ============ OpenAI-compatible backend ============

/// Chat-completions client for llama-server, LM Studio, or OpenAI.
///
/// The system context is sent as the first message, followed by the
/// windowed history with its own system turn removed. `OPENAI_API_KEY`
/// is sent as a bearer token when set.
pub struct OpenAiCompatibleBackend {
    base_url: String,
    model: Option<String>,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            client,
        })
    }

    fn request_body(&self, system_context: &str, history: &[Turn]) -> Value {
        let mut messages = vec![json!({"role": "system", "content": system_context})];
        messages.extend(
            history
                .iter()
                .filter(|t| t.role != Role::System)
                .map(|t| json!({"role": t.role.as_str(), "content": t.content})),
        );

        let mut body = json!({
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });
        if let (Some(model), Some(obj)) = (&self.model, body.as_object_mut()) {
            obj.insert("model".to_string(), json!(model));
        }
        body
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, system_context: &str, history: &[Turn]) -> QaResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .json(&self.request_body(system_context, history));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let res = request.send().await.map_err(QaError::backend)?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(QaError::backend(format!(
                "generation error {}: {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(QaError::backend)?;
        parse_completion(&payload)
    }
}

fn parse_completion(payload: &Value) -> QaResult<String> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| QaError::backend("Invalid completion response: missing message content"))
}

// ============ Echo backend ============

/// Replies with the newest user turn. No network.
pub struct EchoBackend;

#[async_trait]
impl GenerationBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, _system_context: &str, history: &[Turn]) -> QaResult<String> {
        let question = history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or_default();
        Ok(format!("echo: {question}"))
    }
}

/// Build one serializer per configured backend instance.
pub fn create_serializers(config: &GenerationConfig) -> Result<Vec<Arc<GenerationSerializer>>> {
    let mut serializers = Vec::with_capacity(config.instances);
    for _ in 0..config.instances {
        let backend: Arc<dyn GenerationBackend> = match config.provider.as_str() {
            "openai-compatible" => Arc::new(OpenAiCompatibleBackend::new(config)?),
            "echo" => Arc::new(EchoBackend),
            other => bail!("Unknown generation provider: {}", other),
        };
        serializers.push(Arc::new(GenerationSerializer::new(backend)));
    }
    Ok(serializers)
}
