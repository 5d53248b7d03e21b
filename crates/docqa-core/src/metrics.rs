//! Per-day response metrics.
//!
//! Every answered chat exchange records its generation latency under the
//! UTC day it finished on. A day's response count is the number of
//! recorded latencies. Days are `YYYY-MM-DD` strings so they sort
//! chronologically as text.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{QaError, QaResult};

/// Aggregates for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: String,
    pub responses: u64,
    pub total_secs: f64,
    pub mean_secs: f64,
    pub max_secs: f64,
}

impl DailyStats {
    /// Aggregate raw latencies for `date`.
    pub fn from_durations(date: &str, durations: &[f64]) -> Self {
        let total: f64 = durations.iter().sum();
        let responses = durations.len() as u64;
        Self {
            date: date.to_string(),
            responses,
            total_secs: total,
            mean_secs: if responses == 0 { 0.0 } else { total / responses as f64 },
            max_secs: durations.iter().copied().fold(0.0, f64::max),
        }
    }
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Record one answered exchange.
    async fn record_response(&self, date: &str, duration: f64) -> QaResult<()>;

    /// The `days` most recent days with at least one response, newest first.
    async fn daily(&self, days: usize) -> QaResult<Vec<DailyStats>>;
}

/// Latency lists keyed by day.
#[derive(Default)]
pub struct InMemoryMetricsStore {
    days: RwLock<BTreeMap<String, Vec<f64>>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> QaError {
    QaError::index("in-memory metrics lock poisoned")
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn record_response(&self, date: &str, duration: f64) -> QaResult<()> {
        let mut days = self.days.write().map_err(poisoned)?;
        days.entry(date.to_string()).or_default().push(duration);
        Ok(())
    }

    async fn daily(&self, days: usize) -> QaResult<Vec<DailyStats>> {
        let map = self.days.read().map_err(poisoned)?;
        Ok(map
            .iter()
            .rev()
            .take(days)
            .map(|(date, durations)| DailyStats::from_durations(date, durations))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_latencies() {
        let stats = DailyStats::from_durations("2026-01-02", &[1.0, 3.0, 2.0]);
        assert_eq!(stats.responses, 3);
        assert_eq!(stats.total_secs, 6.0);
        assert_eq!(stats.mean_secs, 2.0);
        assert_eq!(stats.max_secs, 3.0);

        let empty = DailyStats::from_durations("2026-01-02", &[]);
        assert_eq!(empty.responses, 0);
        assert_eq!(empty.mean_secs, 0.0);
    }

    #[tokio::test]
    async fn newest_days_first() {
        let store = InMemoryMetricsStore::new();
        store.record_response("2026-01-01", 1.0).await.unwrap();
        store.record_response("2026-01-03", 2.0).await.unwrap();
        store.record_response("2026-01-02", 4.0).await.unwrap();
        store.record_response("2026-01-03", 4.0).await.unwrap();

        let days = store.daily(2).await.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, "2026-01-03");
        assert_eq!(days[0].responses, 2);
        assert_eq!(days[0].mean_secs, 3.0);
        assert_eq!(days[1].date, "2026-01-02");
    }
}
