//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docqa::chat::{ChatEngine, ChatSettings};
use docqa::core::embedding::EmbeddingProvider;
use docqa::core::generation::GenerationBackend;
use docqa::core::history::memory::InMemoryHistoryStore;
use docqa::core::history::HistoryStore;
use docqa::core::index::memory::InMemoryIndex;
use docqa::core::index::Index;
use docqa::core::models::{Role, Turn};
use docqa::core::retrieval::{RetrievalParams, Retriever};
use docqa::core::{QaError, QaResult};
use docqa::generation::GenerationSerializer;

/// Deterministic 26-dim embedder: counts of each ASCII letter.
pub struct LetterEmbedder;

pub fn letters(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 26];
    for b in text.bytes() {
        if b.is_ascii_alphabetic() {
            v[(b.to_ascii_lowercase() - b'a') as usize] += 1.0;
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> QaResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| letters(t)).collect())
    }
}

/// Backend driven by the newest user turn:
///
/// - `boom…` fails with a backend error
/// - `panic…` panics
/// - `sleep:<ms>…` sleeps before answering
/// - `block:<ms>…` blocks its thread before answering (ignores cancellation)
/// - anything else answers immediately
///
/// Answers are `echo: <input>`. Tracks how many calls overlap.
#[derive(Default)]
pub struct ScriptedBackend {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system_context: &str, history: &[Turn]) -> QaResult<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let input = history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.clone())
            .unwrap_or_default();

        if input.starts_with("boom") {
            return Err(QaError::backend("model crashed"));
        }
        if input.starts_with("panic") {
            panic!("backend panicked on {input}");
        }
        if let Some(rest) = input.strip_prefix("sleep:") {
            tokio::time::sleep(Duration::from_millis(leading_ms(rest))).await;
        }
        if let Some(rest) = input.strip_prefix("block:") {
            std::thread::sleep(Duration::from_millis(leading_ms(rest)));
        }
        Ok(format!("echo: {input}"))
    }
}

fn leading_ms(text: &str) -> u64 {
    text.split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0)
}

pub fn serializers_for(backends: &[Arc<ScriptedBackend>]) -> Vec<Arc<GenerationSerializer>> {
    backends
        .iter()
        .map(|b| {
            let backend: Arc<dyn GenerationBackend> = b.clone();
            Arc::new(GenerationSerializer::new(backend))
        })
        .collect()
}

pub fn retriever_over(index: Arc<dyn Index>) -> Retriever {
    Retriever::new(
        index,
        Arc::new(LetterEmbedder),
        RetrievalParams::default(),
        "/corpus",
    )
}

/// Engine over in-memory stores. `context_docs = 0` skips retrieval.
pub fn memory_engine(context_docs: usize) -> (Arc<ChatEngine>, Arc<InMemoryHistoryStore>) {
    let history = Arc::new(InMemoryHistoryStore::new());
    let store: Arc<dyn HistoryStore> = history.clone();
    let engine = ChatEngine::new(
        store,
        retriever_over(Arc::new(InMemoryIndex::new())),
        ChatSettings {
            system_prompt: "You are a test assistant.".to_string(),
            history_budget: 15,
            context_docs,
        },
    );
    (Arc::new(engine), history)
}

/// Poll `cond` every 5ms for up to 5s.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 5s");
}
