//! Engine behaviour against the in-memory index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rag_harness::config::{DocumentsConfig, RetrievalConfig, StartupConfig};
use rag_harness::documents::FsDocumentSource;
use rag_harness::engine::{RecordIdGenerator, RetrievalEngine};
use rag_harness::startup::{reindex_all, run_startup, StartupReport};
use rag_harness_core::chunk::{content_hash, ChunkParams};
use rag_harness_core::embedding::{Embedder, HashingEmbedder, EMBEDDING_DIMS};
use rag_harness_core::error::{Result, RetrievalError};
use rag_harness_core::models::{IndexRequest, SearchMethod};
use rag_harness_core::search::SearchStrategy;
use rag_harness_core::store::memory::InMemoryIndex;
use tempfile::TempDir;

/// Hashing embedder that can be switched into a failing state.
struct SwitchableEmbedder {
    inner: HashingEmbedder,
    failing: AtomicBool,
}

impl SwitchableEmbedder {
    fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(),
            failing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Embedder for SwitchableEmbedder {
    fn model_name(&self) -> &str {
        "switchable"
    }

    fn dims(&self) -> usize {
        EMBEDDING_DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RetrievalError::EmbeddingCompute("switched off".into()));
        }
        self.inner.embed(text).await
    }
}

fn engine(index: &Arc<InMemoryIndex>) -> RetrievalEngine {
    RetrievalEngine::new(
        index.clone(),
        Arc::new(HashingEmbedder::new()),
        ChunkParams::new(20, 5, 3),
        RetrievalConfig::default(),
    )
    .with_id_generator(RecordIdGenerator::starting_at(1))
}

/// A second engine over the same index, as after a process restart.
fn restarted(index: &Arc<InMemoryIndex>) -> RetrievalEngine {
    engine(index).with_id_generator(RecordIdGenerator::starting_at(1_000_000))
}

fn words(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn test_scenario_admin_config_found() {
    let index = Arc::new(InMemoryIndex::new("documents", EMBEDDING_DIMS));
    let engine = engine(&index);

    let outcome = engine
        .index(
            "admin-config.txt",
            "The search threshold is 0.3 and chunk size is 512.",
        )
        .await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.chunk_count, 1);

    let resp = engine.search("search threshold", 1, 0.0).await;
    assert!(resp.success);
    assert_eq!(resp.method, SearchMethod::Vector);
    assert_eq!(resp.total_results, 1);
    assert_eq!(resp.results[0].filename, "admin-config.txt");
    assert!(resp.results[0].similarity > 0.0);
    assert!(resp.results[0].priority);
}

#[tokio::test]
async fn test_reindex_replaces_chunk_set() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = engine(&index);

    let first = engine.index("doc.txt", &words("old", 100)).await;
    assert!(first.success);
    assert!(first.chunk_count > 1);
    let old_ids = index.ids_for("doc.txt");
    assert_eq!(old_ids.len(), first.chunk_count);

    let second = engine.index("doc.txt", &words("new", 30)).await;
    assert!(second.success);
    let new_ids = index.ids_for("doc.txt");
    assert_eq!(new_ids.len(), second.chunk_count);
    assert!(new_ids.iter().all(|id| !old_ids.contains(id)));

    let tracked = engine.tracker().get("doc.txt").unwrap();
    assert_eq!(tracked.record_ids, new_ids);
}

#[tokio::test]
async fn test_remove_deletes_exactly_owned_records() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = engine(&index);

    engine
        .index("a.txt", "kubernetes deployment rollout strategy notes")
        .await;
    engine
        .index("b.txt", "kubernetes cluster upgrade checklist notes")
        .await;
    let b_ids = index.ids_for("b.txt");

    let outcome = engine.remove("a.txt").await;
    assert!(outcome.success);
    assert_eq!(outcome.deleted_count, 1);
    assert!(index.ids_for("a.txt").is_empty());
    assert_eq!(index.ids_for("b.txt"), b_ids);

    let resp = engine.search("kubernetes notes", 5, 0.0).await;
    assert!(resp.results.iter().all(|r| r.filename != "a.txt"));

    let stats = engine.stats().await;
    assert_eq!(stats.record_count, 1);
    assert_eq!(stats.tracked_file_count, 1);
}

#[tokio::test]
async fn test_priority_breaks_equal_similarity() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = engine(&index);
    let text = "rotate the signing keys every ninety days";

    engine.index("notes.txt", text).await;
    engine.index("admin-guide.txt", text).await;

    let resp = engine.search(text, 2, 0.0).await;
    assert_eq!(resp.results.len(), 2);
    assert_eq!(resp.results[0].filename, "admin-guide.txt");
    assert!((resp.results[0].similarity - resp.results[1].similarity).abs() < 1e-6);
    assert!(resp.results[0].boosted_similarity > resp.results[1].boosted_similarity);
}

#[tokio::test]
async fn test_explicit_priority_overrides_name() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = engine(&index);
    let text = "rotate the signing keys every ninety days";

    engine
        .index_document(IndexRequest::new("admin.txt", text).with_priority(false))
        .await;
    engine
        .index_document(IndexRequest::new("plain.txt", text).with_priority(true))
        .await;

    let resp = engine.search(text, 2, 0.0).await;
    assert_eq!(resp.results[0].filename, "plain.txt");
    assert!(!resp.results[1].priority);
}

#[tokio::test]
async fn test_query_failure_falls_back_to_keywords() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = engine(&index);
    engine
        .index("admin-config.txt", "The search threshold is 0.3 and chunk size is 512.")
        .await;
    engine
        .index("other.txt", "Nothing about the topic in this file at all.")
        .await;

    index.fail_queries(true);

    let resp = engine.search("search threshold", 5, 0.3).await;
    assert!(resp.success);
    assert_eq!(resp.method, SearchMethod::KeywordFallback);
    assert_eq!(resp.total_results, 1);
    assert_eq!(resp.results[0].filename, "admin-config.txt");

    let forced = engine
        .search_with(SearchStrategy::Vector, "search threshold", 5, 0.3)
        .await;
    assert!(!forced.success);
    assert_eq!(forced.method, SearchMethod::Vector);
}

#[tokio::test]
async fn test_fallback_on_missing_collection_is_empty() {
    let index = Arc::new(InMemoryIndex::new("documents", EMBEDDING_DIMS));
    let engine = engine(&index);

    let resp = engine.search("anything at all", 5, 0.0).await;
    assert!(resp.success);
    assert_eq!(resp.method, SearchMethod::KeywordFallback);
    assert!(resp.results.is_empty());
}

#[tokio::test]
async fn test_total_outage_returns_failed_envelope() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = engine(&index);
    index.set_available(false);

    let resp = engine.search("search threshold", 5, 0.0).await;
    assert!(!resp.success);
    assert_eq!(resp.method, SearchMethod::KeywordFallback);
    assert!(resp.error.is_some());

    let outcome = engine.index("a.txt", "some words to index here").await;
    assert!(!outcome.success);
    assert!(outcome.retryable);
}

#[tokio::test]
async fn test_embedding_failure_keeps_previous_version() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let embedder = Arc::new(SwitchableEmbedder::new());
    let engine = RetrievalEngine::new(
        index.clone(),
        embedder.clone(),
        ChunkParams::new(20, 5, 3),
        RetrievalConfig::default(),
    );

    engine.index("doc.txt", "first version of the document").await;
    let v1_ids = index.ids_for("doc.txt");

    embedder.failing.store(true, Ordering::SeqCst);
    let outcome = engine.index("doc.txt", "second version of the document").await;
    assert!(!outcome.success);
    assert_eq!(index.ids_for("doc.txt"), v1_ids);

    // the old records are still tracked, so removal takes the id path
    embedder.failing.store(false, Ordering::SeqCst);
    let removed = engine.remove("doc.txt").await;
    assert_eq!(removed.deleted_count, v1_ids.len() as u64);
}

#[tokio::test]
async fn test_concurrent_uploads_leave_one_version() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = Arc::new(engine(&index));

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .index("same.txt", &words(&format!("v{}w", i), 20 + i * 10))
                .await
        }));
    }
    for h in handles {
        assert!(h.await.unwrap().success);
    }

    let stored = index.ids_for("same.txt");
    let tracked = engine.tracker().get("same.txt").unwrap();
    assert_eq!(stored, tracked.record_ids);
    assert_eq!(stored.len(), tracked.chunk_count);
}

#[tokio::test]
async fn test_reconcile_restores_tracking_after_restart() {
    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let before = engine(&index);
    before.index("a.txt", &words("alpha", 50)).await;
    before.index("b.txt", "short note about backups").await;
    let a_ids = index.ids_for("a.txt");

    let after = restarted(&index);
    assert_eq!(after.reconcile().await.unwrap(), 2);
    let entry = after.tracker().get("a.txt").unwrap();
    assert_eq!(entry.record_ids, a_ids);
    assert_eq!(entry.chunk_count, a_ids.len());

    let removed = after.remove("a.txt").await;
    assert_eq!(removed.deleted_count, a_ids.len() as u64);
    assert_eq!(after.stats().await.tracked_file_count, 1);
}

#[tokio::test]
async fn test_startup_indexes_then_skips_unchanged() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.txt"), "alpha document about backups").unwrap();
    std::fs::write(tmp.path().join("b.md"), "beta document about restores").unwrap();
    std::fs::write(tmp.path().join("skip.bin"), "not a document").unwrap();

    let source = FsDocumentSource::new(&DocumentsConfig {
        root: tmp.path().to_path_buf(),
        ..DocumentsConfig::default()
    })
    .unwrap();
    let startup = StartupConfig {
        grace_secs: 0,
        reconcile: true,
        reindex: true,
    };

    let index = Arc::new(InMemoryIndex::new("documents", EMBEDDING_DIMS));
    let first = engine(&index);
    assert!(!first.startup_complete());
    let report = run_startup(&first, &source, &startup).await;
    assert!(report.collection_ready);
    assert_eq!(report.indexed, 2);
    assert!(first.startup_complete());

    // a restarted process finds the same content and skips it
    std::fs::write(tmp.path().join("a.txt"), "alpha document about snapshots").unwrap();
    let second = restarted(&index);
    let report = run_startup(&second, &source, &startup).await;
    assert_eq!(report.reconciled_files, 2);
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(index.ids_for("a.txt").len(), 1);
}

#[tokio::test]
async fn test_startup_reads_document_under_its_lock() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("runbook.txt");
    std::fs::write(&path, "version one of the restart runbook").unwrap();
    let source = Arc::new(
        FsDocumentSource::new(&DocumentsConfig {
            root: tmp.path().to_path_buf(),
            ..DocumentsConfig::default()
        })
        .unwrap(),
    );

    let index = Arc::new(InMemoryIndex::with_collection("documents", EMBEDDING_DIMS));
    let engine = Arc::new(engine(&index));

    // an upload holds the document while startup reaches it
    let guard = engine.lock_document("runbook.txt").await;
    let startup = {
        let engine = engine.clone();
        let source = source.clone();
        tokio::spawn(async move {
            let mut report = StartupReport::default();
            reindex_all(&engine, source.as_ref(), &mut report).await;
            report
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let uploaded = "version two of the restart runbook";
    std::fs::write(&path, uploaded).unwrap();
    let outcome = engine
        .index_document_locked(&guard, IndexRequest::new("runbook.txt", uploaded))
        .await;
    assert!(outcome.success);
    drop(guard);

    let report = startup.await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.indexed, 0);
    let entry = engine.tracker().get("runbook.txt").unwrap();
    assert_eq!(entry.content_hash, content_hash(uploaded));

    let hits = engine
        .search_with(SearchStrategy::Keyword, "two", 5, 0.0)
        .await;
    assert_eq!(hits.total_results, 1);
}
