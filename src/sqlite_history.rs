//! SQLite-backed [`HistoryStore`].
//!
//! Every turn is one row in `chat_turns`, keyed by
//! `chat_history:<session_id>`. An append is a single `INSERT`, which SQLite
//! executes atomically; reads return rows in `seq` order.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docqa_core::history::{history_key, HistoryStore};
use docqa_core::models::{Role, Turn};
use docqa_core::{QaError, QaResult};

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, session_id: &str, turn: &Turn) -> QaResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_turns (session_key, role, content, duration, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(history_key(session_id))
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(turn.duration)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(QaError::index)?;
        Ok(())
    }

    async fn read_all(&self, session_id: &str) -> QaResult<Vec<Turn>> {
        let rows = sqlx::query(
            "SELECT role, content, duration FROM chat_turns WHERE session_key = ? ORDER BY seq",
        )
        .bind(history_key(session_id))
        .fetch_all(&self.pool)
        .await
        .map_err(QaError::index)?;

        rows.iter()
            .map(|row| {
                let role: String = row.try_get("role").map_err(QaError::index)?;
                Ok(Turn {
                    role: role.parse::<Role>().map_err(QaError::index)?,
                    content: row.try_get("content").map_err(QaError::index)?,
                    duration: row.try_get("duration").map_err(QaError::index)?,
                })
            })
            .collect()
    }
}
