//! In-memory [`HistoryStore`] for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{QaError, QaResult};
use crate::models::Turn;

use super::{history_key, HistoryStore};

/// Session lists keyed by `chat_history:<session_id>`.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    lists: RwLock<HashMap<String, Vec<Turn>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key currently holding at least one turn.
    pub fn keys(&self) -> Vec<String> {
        self.lists
            .read()
            .map(|lists| lists.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> QaError {
    QaError::index("in-memory history lock poisoned")
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, session_id: &str, turn: &Turn) -> QaResult<()> {
        let mut lists = self.lists.write().map_err(poisoned)?;
        lists
            .entry(history_key(session_id))
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn read_all(&self, session_id: &str) -> QaResult<Vec<Turn>> {
        let lists = self.lists.read().map_err(poisoned)?;
        Ok(lists
            .get(&history_key(session_id))
            .cloned()
            .unwrap_or_default())
    }
}
