//! HTTP server.
//!
//! A thin JSON layer over [`App`]: chat jobs go through the queue, retrieval
//! and history reads go straight to the core, uploads run the ingestion
//! pipeline inline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Version, queue counters, chunk count |
//! | `POST` | `/chat` | `{session_id, input}` → `{response, duration}` |
//! | `GET`  | `/chat/history?session_id=` | Visible history (system turns hidden) |
//! | `POST` | `/retrieve` | `{query, mode?, k?}` → `{documents, metadatas}` |
//! | `POST` | `/upload?filename=` | Raw body → `{filename, chunks, moved, ...}` |
//! | `GET`  | `/stats?days=` | Per-day response counts and latencies, newest first |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "queue_full", "message": "job queue is full" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `extraction_error` | 422 |
//! | `queue_full` | 429 |
//! | `backend_error` | 502 |
//! | `shutting_down`, `index_unavailable` | 503 |
//! | `internal` | 500 |
//!
//! # Shutdown
//!
//! On Ctrl-C the listener stops accepting connections, in-flight requests
//! finish, and then the queue is shut down so every pending chat job
//! resolves.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use docqa_core::history::visible_history;
use docqa_core::metrics::DailyStats;
use docqa_core::models::{ChatReply, Metadata, Turn};
use docqa_core::retrieval::RetrievalMode;
use docqa_core::QaError;

use crate::app::App;
use crate::config::Config;
use crate::ingest::IngestOutcome;
use crate::queue::QueueStats;

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Build the app, serve until Ctrl-C, then drain the queue.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = Arc::new(App::build(config).await?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "docqa server listening");

    axum::serve(listener, router(app.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped; shutting down chat queue");
    app.shutdown().await;
    Ok(())
}

/// Routes with CORS and request tracing.
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/chat/history", get(handle_history))
        .route("/retrieve", post(handle_retrieve))
        .route("/stats", get(handle_stats))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; serve until the process is killed.
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// [`QaError`] rendered as an HTTP response.
struct AppError(QaError);

impl From<QaError> for AppError {
    fn from(err: QaError) -> Self {
        AppError(err)
    }
}

fn status_for(err: &QaError) -> StatusCode {
    match err {
        QaError::Validation(_) => StatusCode::BAD_REQUEST,
        QaError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QaError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
        QaError::TransientBackend(_) => StatusCode::BAD_GATEWAY,
        QaError::ShuttingDown | QaError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        QaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status_for(&self.0), Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chunks: usize,
    queue: QueueStats,
}

async fn handle_health(State(app): State<Arc<App>>) -> Result<Json<HealthResponse>, AppError> {
    let chunks = app.index.count().await?;
    let status = if app.queue.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chunks,
        queue: app.queue.stats(),
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    input: String,
}

async fn handle_chat(
    State(app): State<Arc<App>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    let handle = app.queue.submit(&req.session_id, &req.input).await?;
    Ok(Json(handle.await?))
}

// ============ GET /chat/history ============

#[derive(Deserialize)]
struct HistoryQuery {
    session_id: String,
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    turns: Vec<Turn>,
}

async fn handle_history(
    State(app): State<Arc<App>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    docqa_core::models::validate_session_id(&q.session_id)?;
    let turns = visible_history(app.history.as_ref(), &q.session_id).await?;
    Ok(Json(HistoryResponse {
        session_id: q.session_id,
        turns,
    }))
}

// ============ POST /retrieve ============

#[derive(Deserialize)]
struct RetrieveRequest {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

/// Parallel lists: `documents[i]` is the source path of `metadatas[i]`.
#[derive(Serialize)]
struct RetrieveResponse {
    documents: Vec<PathBuf>,
    metadatas: Vec<Metadata>,
}

async fn handle_retrieve(
    State(app): State<Arc<App>>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    let mode = match req.mode.as_deref() {
        Some(m) => m.parse::<RetrievalMode>()?,
        None => RetrievalMode::Similarity,
    };
    let refs = app.retriever.retrieve(&req.query, mode, req.k).await?;
    let (documents, metadatas) = refs
        .into_iter()
        .map(|r| (r.source_path, r.metadata))
        .unzip();
    Ok(Json(RetrieveResponse {
        documents,
        metadatas,
    }))
}

// ============ GET /stats ============

/// Days reported when the query gives none.
const DEFAULT_STATS_DAYS: usize = 7;

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default)]
    days: Option<usize>,
}

#[derive(Serialize)]
struct StatsResponse {
    days: Vec<DailyStats>,
}

async fn handle_stats(
    State(app): State<Arc<App>>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, AppError> {
    let days = app
        .metrics
        .daily(q.days.unwrap_or(DEFAULT_STATS_DAYS))
        .await?;
    Ok(Json(StatsResponse { days }))
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadQuery {
    filename: String,
}

async fn handle_upload(
    State(app): State<Arc<App>>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<IngestOutcome>, AppError> {
    if body.is_empty() {
        return Err(QaError::validation("upload body is empty").into());
    }
    let outcome = app.ingest.ingest(body.to_vec(), &q.filename).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        assert_eq!(status_for(&QaError::QueueFull), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status_for(&QaError::validation("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&QaError::ShuttingDown),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&QaError::extraction("x")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&QaError::backend("x")), StatusCode::BAD_GATEWAY);
    }
}
