mod common;

use std::path::Path;
use std::sync::Arc;

use docqa::core::boilerplate::BoilerplateRules;
use docqa::core::index::Index;
use docqa::core::models::Metadata;
use docqa::core::retrieval::RetrievalMode;
use docqa::core::{QaError, QaResult};
use docqa::db::connect_path;
use docqa::extract::{DocumentExtractor, ExtractedText, TextExtractor, MIME_PDF};
use docqa::ingest::{IngestPipeline, IngestSettings};
use docqa::migrate::migrate_pool;
use docqa::sqlite_index::SqliteIndex;
use tempfile::TempDir;

use common::{retriever_over, LetterEmbedder};

struct Fixture {
    tmp: TempDir,
    index: Arc<SqliteIndex>,
    pipeline: Arc<IngestPipeline>,
}

async fn fixture_with(corpus_dir: Option<&Path>) -> Fixture {
    build_fixture(corpus_dir, Arc::new(DocumentExtractor)).await
}

async fn build_fixture(corpus_dir: Option<&Path>, extractor: Arc<dyn TextExtractor>) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let pool = connect_path(&tmp.path().join("docqa.sqlite")).await.unwrap();
    migrate_pool(&pool).await.unwrap();
    let index = Arc::new(SqliteIndex::new(pool));

    let settings = IngestSettings {
        staging_dir: tmp.path().join("uploads"),
        corpus_dir: corpus_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| tmp.path().join("data")),
        chunk_size: 20_000,
        chunk_overlap: 2_000,
        rules: BoilerplateRules::default(),
    };
    let pipeline = Arc::new(IngestPipeline::new(
        index.clone(),
        Arc::new(LetterEmbedder),
        extractor,
        settings,
    ));
    Fixture {
        tmp,
        index,
        pipeline,
    }
}

async fn fixture() -> Fixture {
    fixture_with(None).await
}

fn long_text(chars: usize) -> String {
    "lorem ipsum dolor sit amet ".chars().cycle().take(chars).collect()
}

#[tokio::test]
async fn large_text_is_chunked_stored_and_moved() {
    let f = fixture().await;
    let outcome = f
        .pipeline
        .ingest(long_text(50_000).into_bytes(), "big.txt")
        .await
        .unwrap();

    assert_eq!(outcome.filename, "big.txt");
    assert_eq!(outcome.chunks, 3);
    assert_eq!(outcome.pages_total, 1);
    assert_eq!(outcome.pages_kept, 1);
    assert!(outcome.moved);
    assert!(f.tmp.path().join("data/big.txt").exists());
    assert!(!f.tmp.path().join("uploads/big.txt").exists());

    assert_eq!(f.index.count().await.unwrap(), 3);

    let retriever = retriever_over(f.index.clone());
    let refs = retriever
        .retrieve("lorem ipsum", RetrievalMode::Keyword, Some(5))
        .await
        .unwrap();
    assert_eq!(refs.len(), 3);
    let stored_at = f.tmp.path().join("data/big.txt");
    assert_eq!(refs[0].source_path, stored_at);
    assert_eq!(refs[0].metadata["source"], stored_at.to_string_lossy().into_owned());
    assert_eq!(refs[0].metadata["filename"], "big.txt");
    assert_eq!(refs[0].metadata["content_type"], "text/plain");
    assert_eq!(refs[0].metadata["chunk_count"], 3);
}

/// Returns one fixed page plus document fields, whatever the input.
struct TitledExtractor;

impl TextExtractor for TitledExtractor {
    fn extract(&self, _bytes: &[u8], _filename: &str) -> QaResult<ExtractedText> {
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), "Pump Manual".into());
        metadata.insert("author".into(), "Ops Team".into());
        metadata.insert("source".into(), "/somewhere/else.pdf".into());
        Ok(ExtractedText {
            pages: vec!["Bleed the air before priming the pump.".to_string()],
            content_type: MIME_PDF,
            metadata,
        })
    }
}

#[tokio::test]
async fn document_fields_are_merged_into_every_chunk() {
    let f = build_fixture(None, Arc::new(TitledExtractor)).await;
    f.pipeline
        .ingest(b"%PDF".to_vec(), "pump.pdf")
        .await
        .unwrap();

    let chunks = retriever_over(f.index.clone())
        .select("priming", RetrievalMode::Keyword, None)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    let meta = &chunks[0].metadata;
    assert_eq!(meta["title"], "Pump Manual");
    assert_eq!(meta["author"], "Ops Team");
    assert_eq!(meta["content_type"], MIME_PDF);
    assert_eq!(
        meta["source"],
        f.tmp.path().join("data/pump.pdf").to_string_lossy().into_owned()
    );
}

#[tokio::test]
async fn failed_extraction_appends_nothing() {
    let f = fixture().await;
    let err = f
        .pipeline
        .ingest(b"definitely not a pdf".to_vec(), "broken.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, QaError::Extraction(_)));
    assert_eq!(f.index.count().await.unwrap(), 0);
    // Left in staging for a later retry.
    assert!(f.tmp.path().join("uploads/broken.pdf").exists());
}

#[tokio::test]
async fn front_matter_only_document_is_rejected() {
    let f = fixture().await;
    let err = f
        .pipeline
        .ingest(b"Table of Contents\n1 Intro ..... 3".to_vec(), "toc.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, QaError::Extraction(_)));
    assert_eq!(f.index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn front_matter_pages_are_dropped() {
    let f = fixture().await;
    let text = "Table of Contents\n1 Intro ..... 3\x0cThe pump must be primed before use.";
    let outcome = f
        .pipeline
        .ingest(text.as_bytes().to_vec(), "manual.txt")
        .await
        .unwrap();
    assert_eq!(outcome.pages_total, 2);
    assert_eq!(outcome.pages_kept, 1);

    let chunks = retriever_over(f.index.clone())
        .select("pump", RetrievalMode::Keyword, None)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.contains("--- Page 2 ---"));
    assert!(!chunks[0].content.contains("Table of Contents"));
}

#[tokio::test]
async fn relocation_failure_still_counts_as_ingested() {
    let blocker = TempDir::new().unwrap();
    let not_a_dir = blocker.path().join("occupied");
    std::fs::write(&not_a_dir, b"file in the way").unwrap();

    let f = fixture_with(Some(not_a_dir.as_path())).await;
    let outcome = f
        .pipeline
        .ingest(b"short note about valves".to_vec(), "note.txt")
        .await
        .unwrap();
    assert!(!outcome.moved);
    assert_eq!(outcome.chunks, 1);
    assert_eq!(f.index.count().await.unwrap(), 1);
    assert!(f.tmp.path().join("uploads/note.txt").exists());
}

#[tokio::test]
async fn unsafe_filenames_are_rejected_before_staging() {
    let f = fixture().await;
    for name in ["", "..", "../escape.txt", "nested/file.txt"] {
        let err = f.pipeline.ingest(b"x".to_vec(), name).await.unwrap_err();
        assert!(matches!(err, QaError::Validation(_)), "{name:?}");
    }
    assert!(!f.tmp.path().join("escape.txt").exists());
}

#[tokio::test]
async fn staged_batch_reports_each_file() {
    let f = fixture().await;
    let staging = f.tmp.path().join("uploads");
    let corpus = f.tmp.path().join("data");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::create_dir_all(&corpus).unwrap();

    std::fs::write(staging.join("a.txt"), "alpha content").unwrap();
    std::fs::write(staging.join("b.pdf"), "not a pdf").unwrap();
    std::fs::write(staging.join("c.md"), "already there").unwrap();
    std::fs::write(corpus.join("c.md"), "already there").unwrap();

    let report = f.pipeline.ingest_staged().await.unwrap();
    assert_eq!(report.ingested.len(), 1);
    assert_eq!(report.ingested[0].filename, "a.txt");
    assert_eq!(report.skipped, vec!["c.md".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].filename, "b.pdf");

    assert_eq!(f.index.count().await.unwrap(), 1);
    assert!(corpus.join("a.txt").exists());
}

#[tokio::test]
async fn staged_batch_without_staging_dir_is_empty() {
    let f = fixture().await;
    let report = f.pipeline.ingest_staged().await.unwrap();
    assert!(report.ingested.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_partial_document() {
    let f = fixture().await;

    let writer = {
        let pipeline = f.pipeline.clone();
        tokio::spawn(async move {
            for i in 0..8 {
                let outcome = pipeline
                    .ingest(long_text(50_000).into_bytes(), &format!("doc{i}.txt"))
                    .await
                    .unwrap();
                assert_eq!(outcome.chunks, 3);
            }
        })
    };

    let retriever = retriever_over(f.index.clone());
    while !writer.is_finished() {
        let count = f.index.count().await.unwrap();
        assert_eq!(count % 3, 0, "saw {count} chunks");
        let chunks = retriever
            .select("lorem", RetrievalMode::Keyword, Some(100))
            .await
            .unwrap();
        assert_eq!(chunks.len() % 3, 0);
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    assert_eq!(f.index.count().await.unwrap(), 24);
}
