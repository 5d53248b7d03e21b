//! SQLite-backed [`MetricsStore`].
//!
//! Each answered exchange is one row in `response_times`; per-day counts
//! and latency aggregates are computed at read time.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docqa_core::metrics::{DailyStats, MetricsStore};
use docqa_core::{QaError, QaResult};

pub struct SqliteMetricsStore {
    pool: SqlitePool,
}

impl SqliteMetricsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for SqliteMetricsStore {
    async fn record_response(&self, date: &str, duration: f64) -> QaResult<()> {
        sqlx::query("INSERT INTO response_times (day, duration, created_at) VALUES (?, ?, ?)")
            .bind(date)
            .bind(duration)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(QaError::index)?;
        Ok(())
    }

    async fn daily(&self, days: usize) -> QaResult<Vec<DailyStats>> {
        let rows = sqlx::query(
            r#"
            SELECT day, COUNT(*) AS responses, SUM(duration) AS total, MAX(duration) AS max
            FROM response_times
            GROUP BY day
            ORDER BY day DESC
            LIMIT ?
            "#,
        )
        .bind(days as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(QaError::index)?;

        rows.iter()
            .map(|row| {
                let responses: i64 = row.try_get("responses").map_err(QaError::index)?;
                let total: f64 = row.try_get("total").map_err(QaError::index)?;
                Ok(DailyStats {
                    date: row.try_get("day").map_err(QaError::index)?,
                    responses: responses as u64,
                    total_secs: total,
                    mean_secs: if responses > 0 { total / responses as f64 } else { 0.0 },
                    max_secs: row.try_get("max").map_err(QaError::index)?,
                })
            })
            .collect()
    }
}
