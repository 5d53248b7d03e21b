//! One chat exchange, end to end.
//!
//! [`ChatEngine::respond`] is what a queue worker runs for each job:
//!
//! 1. ensure the session's system turn exists;
//! 2. append the user turn;
//! 3. read and window the history;
//! 4. retrieve `context_docs` chunks in similarity mode (skipped when
//!    embeddings are disabled);
//! 5. generate through the worker's [`GenerationSerializer`];
//! 6. append the assistant turn with its latency;
//! 7. record the latency under today's UTC date in the [`MetricsStore`].
//!
//! A failure in steps 1 to 6 is returned to the caller and nothing after it
//! runs, so a failed generation leaves the user turn without a reply. A
//! failed metrics write is only logged.

use std::sync::Arc;
use tracing::{debug, info, warn};

use docqa_core::generation::{build_system_context, system_prompt_of};
use docqa_core::history::{ensure_system_prompt, window_turns, HistoryStore};
use docqa_core::metrics::MetricsStore;
use docqa_core::models::{ChatReply, Turn};
use docqa_core::retrieval::{RetrievalMode, Retriever};
use docqa_core::QaResult;

use crate::generation::GenerationSerializer;

/// Per-exchange settings.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_prompt: String,
    /// Turn budget passed to [`window_turns`].
    pub history_budget: usize,
    /// Chunks retrieved as context; `0` skips retrieval.
    pub context_docs: usize,
}

/// History, retrieval and generation wired together.
pub struct ChatEngine {
    history: Arc<dyn HistoryStore>,
    retriever: Retriever,
    settings: ChatSettings,
    metrics: Option<Arc<dyn MetricsStore>>,
}

impl ChatEngine {
    pub fn new(history: Arc<dyn HistoryStore>, retriever: Retriever, settings: ChatSettings) -> Self {
        Self {
            history,
            retriever,
            settings,
            metrics: None,
        }
    }

    /// Record each answered exchange in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Run one exchange for `session_id` using `serializer`'s backend.
    pub async fn respond(
        &self,
        serializer: &GenerationSerializer,
        session_id: &str,
        input: &str,
    ) -> QaResult<ChatReply> {
        let store = self.history.as_ref();
        if ensure_system_prompt(store, session_id, &self.settings.system_prompt).await? {
            debug!(session = %session_id, "new session");
        }
        store.append(session_id, &Turn::user(input)).await?;

        let turns = store.read_all(session_id).await?;
        let window = window_turns(&turns, self.settings.history_budget);

        let context = if self.settings.context_docs > 0 && self.retriever.can_embed() {
            self.retriever
                .select(
                    input,
                    RetrievalMode::Similarity,
                    Some(self.settings.context_docs),
                )
                .await?
        } else {
            Vec::new()
        };
        let system_context = build_system_context(system_prompt_of(&window), &context);

        let (response, elapsed) = serializer.generate(&system_context, &window).await?;
        let duration = elapsed.as_secs_f64();

        store
            .append(session_id, &Turn::assistant(response.clone(), duration))
            .await?;

        if let Some(metrics) = &self.metrics {
            let today = chrono::Utc::now().date_naive().to_string();
            if let Err(e) = metrics.record_response(&today, duration).await {
                warn!(session = %session_id, error = %e, "failed to record response metrics");
            }
        }

        info!(
            session = %session_id,
            backend = serializer.backend_name(),
            window = window.len(),
            context_docs = context.len(),
            duration_secs = duration,
            "chat reply"
        );
        Ok(ChatReply { response, duration })
    }
}
