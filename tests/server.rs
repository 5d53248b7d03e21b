mod common;

use serde_json::{json, Value};
use std::sync::Arc;

use docqa::app::App;
use docqa::chat::{ChatEngine, ChatSettings};
use docqa::config::parse_config;
use docqa::core::boilerplate::BoilerplateRules;
use docqa::core::history::HistoryStore;
use docqa::core::index::Index;
use docqa::core::metrics::MetricsStore;
use docqa::db::connect_path;
use docqa::extract::DocumentExtractor;
use docqa::ingest::{IngestPipeline, IngestSettings};
use docqa::migrate::migrate_pool;
use docqa::queue::{ChatQueue, QueueConfig};
use docqa::server::router;
use docqa::sqlite_history::SqliteHistoryStore;
use docqa::sqlite_index::SqliteIndex;
use docqa::sqlite_metrics::SqliteMetricsStore;
use tempfile::TempDir;

use common::{retriever_over, serializers_for, LetterEmbedder, ScriptedBackend};

struct Server {
    tmp: TempDir,
    app: Arc<App>,
    base: String,
    client: reqwest::Client,
}

async fn start() -> Server {
    let tmp = TempDir::new().unwrap();
    let config = parse_config(&format!(
        "[db]\npath = \"{}\"\n",
        tmp.path().join("docqa.sqlite").display()
    ))
    .unwrap();

    let pool = connect_path(&config.db.path).await.unwrap();
    migrate_pool(&pool).await.unwrap();
    let index: Arc<dyn Index> = Arc::new(SqliteIndex::new(pool.clone()));
    let history: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::new(pool.clone()));
    let metrics: Arc<dyn MetricsStore> = Arc::new(SqliteMetricsStore::new(pool.clone()));
    let retriever = retriever_over(index.clone());

    let engine = Arc::new(
        ChatEngine::new(
            history.clone(),
            retriever.clone(),
            ChatSettings {
                system_prompt: "Answer from context.".to_string(),
                history_budget: 15,
                context_docs: 2,
            },
        )
        .with_metrics(metrics.clone()),
    );
    let queue = Arc::new(
        ChatQueue::start(
            engine.clone(),
            serializers_for(&[ScriptedBackend::new()]),
            QueueConfig {
                workers: 2,
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let ingest = Arc::new(IngestPipeline::new(
        index.clone(),
        Arc::new(LetterEmbedder),
        Arc::new(DocumentExtractor),
        IngestSettings {
            staging_dir: tmp.path().join("uploads"),
            corpus_dir: tmp.path().join("data"),
            chunk_size: 1_000,
            chunk_overlap: 100,
            rules: BoilerplateRules::default(),
        },
    ));

    let app = Arc::new(App {
        config: Arc::new(config),
        pool,
        index,
        history,
        metrics,
        retriever,
        engine,
        queue,
        ingest,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = router(app.clone());
    tokio::spawn(async move {
        axum::serve(listener, routes).await.unwrap();
    });

    Server {
        tmp,
        app,
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
    }
}

impl Server {
    async fn post_json(&self, path: &str, body: Value) -> (u16, Value) {
        let res = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }
}

#[tokio::test]
async fn health_reports_version_and_queue() {
    let server = start().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["chunks"], 0);
    assert_eq!(body["queue"]["submitted"], 0);
}

#[tokio::test]
async fn upload_then_retrieve() {
    let server = start().await;
    let res = server
        .client
        .post(format!("{}/upload?filename=pumps.txt", server.base))
        .body("Prime the centrifugal pump before starting.")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let outcome: Value = res.json().await.unwrap();
    assert_eq!(outcome["filename"], "pumps.txt");
    assert_eq!(outcome["chunks"], 1);
    assert_eq!(outcome["moved"], true);

    let (status, body) = server
        .post_json("/retrieve", json!({"query": "centrifugal PUMP", "mode": "keyword"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["documents"].as_array().unwrap().len(), 1);
    let stored_at = server.tmp.path().join("data/pumps.txt");
    assert_eq!(body["documents"][0], stored_at.to_string_lossy().into_owned());
    assert_eq!(body["metadatas"][0]["filename"], "pumps.txt");
}

#[tokio::test]
async fn upload_errors_map_to_status_codes() {
    let server = start().await;
    let res = server
        .client
        .post(format!("{}/upload?filename=broken.pdf", server.base))
        .body("not a pdf")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 422);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "extraction_error");

    let res = server
        .client
        .post(format!("{}/upload?filename=..", server.base))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn chat_and_history() {
    let server = start().await;
    let (status, body) = server
        .post_json("/chat", json!({"session_id": "web-1", "input": "hello"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["response"], "echo: hello");
    assert!(body["duration"].as_f64().unwrap() >= 0.0);

    let (status, body) = server.get("/chat/history?session_id=web-1").await;
    assert_eq!(status, 200);
    let turns = body["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[1]["role"], "assistant");
}

#[tokio::test]
async fn stats_count_answered_chats() {
    let server = start().await;
    let (_, body) = server.get("/stats").await;
    assert!(body["days"].as_array().unwrap().is_empty());

    for input in ["one", "two", "boom"] {
        server
            .post_json("/chat", json!({"session_id": "stats", "input": input}))
            .await;
    }

    let (status, body) = server.get("/stats?days=3").await;
    assert_eq!(status, 200);
    let days = body["days"].as_array().unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0]["date"], chrono::Utc::now().date_naive().to_string());
    assert_eq!(days[0]["responses"], 2);
}

#[tokio::test]
async fn bad_requests_use_error_envelope() {
    let server = start().await;

    let (status, body) = server
        .post_json("/chat", json!({"session_id": "web-1", "input": "  "}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = server
        .post_json("/retrieve", json!({"query": "x", "mode": "fuzzy"}))
        .await;
    assert_eq!(status, 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("fuzzy"));
}

#[tokio::test]
async fn chat_after_shutdown_is_unavailable() {
    let server = start().await;
    server.app.queue.shutdown().await;
    let (status, body) = server
        .post_json("/chat", json!({"session_id": "late", "input": "hi"}))
        .await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "shutting_down");
}
