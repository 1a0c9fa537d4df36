//! The retrieval engine.
//!
//! [`RetrievalEngine`] is the single entry point the server and CLI use. It
//! owns the embedder, the vector index, the file lifecycle tracker and the
//! record id generator, and turns every failure into a result envelope:
//! none of its public operations return `Err` except
//! [`reconcile`](RetrievalEngine::reconcile), which startup code inspects.
//!
//! # Indexing
//!
//! ```text
//! lock(name) → chunk → embed each chunk → clear previous records
//!            → upsert batch (ensure collection + retry once if missing)
//!            → record tracker entry
//! ```
//!
//! Chunks are embedded before anything is deleted, so a failed embedding
//! leaves the previous version of the document searchable.
//!
//! # Searching
//!
//! With [`SearchStrategy::Auto`] the vector path runs first. Any error from
//! embedding or querying hands the whole request to the keyword fallback,
//! which scans at most `retrieval.fallback_scan_limit` stored chunks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use rag_harness_core::chunk::{chunk_words, content_hash, ChunkParams};
use rag_harness_core::embedding::Embedder;
use rag_harness_core::error::{Result, RetrievalError};
use rag_harness_core::models::{
    EngineStats, IndexOutcome, IndexRequest, RecordPayload, RemoveOutcome, SearchMethod,
    SearchResponse, SearchResult, VectorRecord,
};
use rag_harness_core::search::{keyword_match, rank, PriorityRules, SearchStrategy};
use rag_harness_core::store::VectorIndex;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::create_embedder;
use crate::qdrant::QdrantIndex;
use crate::tracker::{FileEntry, FileGuard, FileTracker};

/// Page size used when scrolling the whole index.
const RECONCILE_PAGE: usize = 256;

/// Process-unique, monotonically increasing record ids.
///
/// Seeded from wall-clock milliseconds × 1000 so a restarted process does
/// not reuse ids written by the previous run.
#[derive(Debug)]
pub struct RecordIdGenerator {
    next: AtomicU64,
}

impl RecordIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp_millis().max(0) as u64 * 1000)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for RecordIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RetrievalEngine {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkParams,
    retrieval: RetrievalConfig,
    priority: PriorityRules,
    tracker: FileTracker,
    ids: RecordIdGenerator,
    startup_complete: AtomicBool,
}

/// Build an engine backed by Qdrant and the configured embedder.
pub fn build_engine(config: &Config) -> anyhow::Result<RetrievalEngine> {
    let embedder = create_embedder(&config.embedding)?;
    let index = QdrantIndex::new(&config.index, embedder.dims())?;
    Ok(RetrievalEngine::new(
        Arc::new(index),
        embedder,
        config.chunking.params(),
        config.retrieval.clone(),
    ))
}

impl RetrievalEngine {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkParams,
        retrieval: RetrievalConfig,
    ) -> Self {
        let priority = PriorityRules::new(&retrieval.priority_patterns);
        Self {
            index,
            embedder,
            chunking,
            retrieval,
            priority,
            tracker: FileTracker::new(),
            ids: RecordIdGenerator::new(),
            startup_complete: AtomicBool::new(false),
        }
    }

    /// Replace the id generator, for deterministic ids in tests.
    pub fn with_id_generator(mut self, ids: RecordIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn collection(&self) -> &str {
        self.index.collection()
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    pub fn tracker(&self) -> &FileTracker {
        &self.tracker
    }

    pub fn startup_complete(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }

    pub fn mark_startup_complete(&self) {
        self.startup_complete.store(true, Ordering::SeqCst);
    }

    /// Create the collection if it is absent. Failure is logged and
    /// reported as `false`; callers keep running in degraded mode.
    pub async fn ensure_collection(&self) -> bool {
        match self.index.ensure_collection().await {
            Ok(true) => {
                info!(collection = %self.index.collection(), dims = self.index.dims(), "created collection");
                true
            }
            Ok(false) => {
                debug!(collection = %self.index.collection(), "collection already exists");
                true
            }
            Err(e) => {
                warn!(collection = %self.index.collection(), error = %e, "could not ensure collection");
                false
            }
        }
    }

    /// Whether the store answers a describe call.
    pub async fn store_reachable(&self) -> bool {
        self.index.collection_exists().await.is_ok()
    }

    // ============ Indexing ============

    /// Index `content` under `name`, deriving priority from the name.
    pub async fn index(&self, name: &str, content: &str) -> IndexOutcome {
        self.index_document(IndexRequest::new(name, content)).await
    }

    /// Wait for exclusive access to `name`.
    ///
    /// Callers that touch the document's file as well as its records hold
    /// this guard across both and use the `*_locked` operations.
    pub async fn lock_document(&self, name: &str) -> FileGuard {
        self.tracker.lock(name).await
    }

    /// Index one document, replacing any previous version of it.
    pub async fn index_document(&self, request: IndexRequest) -> IndexOutcome {
        let guard = self.tracker.lock(&request.name).await;
        self.index_document_locked(&guard, request).await
    }

    /// [`index_document`](Self::index_document) under a guard from
    /// [`lock_document`](Self::lock_document).
    pub async fn index_document_locked(
        &self,
        guard: &FileGuard,
        request: IndexRequest,
    ) -> IndexOutcome {
        if request.name.trim().is_empty() {
            return IndexOutcome {
                success: false,
                filename: request.name,
                chunk_count: 0,
                error: Some("document name must not be empty".to_string()),
                retryable: false,
            };
        }
        self.index_locked(guard, &request).await
    }

    /// Index `request` unless the tracker already holds a successful entry
    /// with the same content hash. Returns `None` when skipped.
    pub async fn index_if_changed(&self, request: IndexRequest) -> Option<IndexOutcome> {
        let guard = self.tracker.lock(&request.name).await;
        self.index_if_changed_locked(&guard, request).await
    }

    pub async fn index_if_changed_locked(
        &self,
        guard: &FileGuard,
        request: IndexRequest,
    ) -> Option<IndexOutcome> {
        let hash = content_hash(&request.content);
        if let Some(entry) = self.tracker.get(&request.name) {
            if entry.success && entry.content_hash == hash {
                debug!(filename = %request.name, "unchanged, skipping");
                return None;
            }
        }
        Some(self.index_document_locked(guard, request).await)
    }

    async fn index_locked(&self, guard: &FileGuard, request: &IndexRequest) -> IndexOutcome {
        let name = request.name.as_str();
        let hash = content_hash(&request.content);
        let priority = request
            .priority
            .unwrap_or_else(|| self.priority.matches(name));
        let chunks = chunk_words(name, &request.content, &self.chunking);

        let mut records = Vec::with_capacity(chunks.len());
        let timestamp = Utc::now().to_rfc3339();
        for chunk in &chunks {
            let vector = match self.embedder.embed(&chunk.text).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(filename = %name, chunk = chunk.index, error = %e, "embedding failed");
                    return self.fail(guard, name, &hash, e, true);
                }
            };
            records.push(VectorRecord {
                id: self.ids.next_id(),
                vector,
                payload: RecordPayload {
                    text: chunk.text.clone(),
                    filename: name.to_string(),
                    chunk_index: chunk.index,
                    total_chunks: chunk.total,
                    timestamp: timestamp.clone(),
                    priority,
                    content_hash: hash.clone(),
                },
            });
        }

        if let Err(e) = self.clear_previous(name).await {
            warn!(filename = %name, error = %e, "could not clear previous records");
            return self.fail(guard, name, &hash, e, true);
        }

        if let Err(e) = self.upsert_batch(&records).await {
            let err = RetrievalError::TotalBatchFailure {
                filename: name.to_string(),
                chunks: records.len(),
                source: Box::new(e),
            };
            warn!(filename = %name, error = %err, "batch upsert failed");
            // previous records are gone; leave nothing for the id fast path
            return self.fail(guard, name, &hash, err, false);
        }

        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        let chunk_count = ids.len();
        self.tracker
            .set(guard, name, FileEntry::indexed(ids, hash));
        info!(filename = %name, chunks = chunk_count, priority, "indexed document");

        IndexOutcome {
            success: true,
            filename: name.to_string(),
            chunk_count,
            error: None,
            retryable: false,
        }
    }

    /// Remove whatever the index holds for `name` before writing a new batch.
    async fn clear_previous(&self, name: &str) -> Result<()> {
        let tracked = self
            .tracker
            .get(name)
            .map(|e| e.record_ids)
            .unwrap_or_default();
        let result = if tracked.is_empty() {
            self.index.delete_by_filename(name).await
        } else {
            self.index.delete_by_ids(&tracked).await
        };
        match result {
            Err(e) if e.is_collection_missing() => Ok(()),
            other => other,
        }
    }

    async fn upsert_batch(&self, records: &[VectorRecord]) -> Result<()> {
        match self.index.upsert(records).await {
            Err(e) if e.is_collection_missing() => {
                info!(collection = %self.index.collection(), "collection missing, creating before retry");
                self.index.ensure_collection().await?;
                self.index.upsert(records).await
            }
            other => other,
        }
    }

    // Record a failed attempt. With `keep_ids`, the previous record ids stay
    // tracked because those records are still in the index.
    fn fail(
        &self,
        guard: &FileGuard,
        name: &str,
        hash: &str,
        error: RetrievalError,
        keep_ids: bool,
    ) -> IndexOutcome {
        let mut entry = FileEntry::failed(hash.to_string(), error.to_string());
        if keep_ids {
            if let Some(previous) = self.tracker.get(name) {
                entry.chunk_count = previous.record_ids.len();
                entry.record_ids = previous.record_ids;
            }
        }
        self.tracker.set(guard, name, entry);

        IndexOutcome {
            success: false,
            filename: name.to_string(),
            chunk_count: 0,
            retryable: error.is_retryable(),
            error: Some(error.to_string()),
        }
    }

    // ============ Removal ============

    /// Delete every record owned by `name` and forget it.
    pub async fn remove(&self, name: &str) -> RemoveOutcome {
        let guard = self.tracker.lock(name).await;
        self.remove_locked(&guard, name).await
    }

    pub async fn remove_locked(&self, guard: &FileGuard, name: &str) -> RemoveOutcome {
        let tracked = self
            .tracker
            .get(name)
            .map(|e| e.record_ids)
            .unwrap_or_default();

        let result = if tracked.is_empty() {
            self.remove_by_filter(name).await
        } else {
            self.index
                .delete_by_ids(&tracked)
                .await
                .map(|_| tracked.len() as u64)
        };

        match result {
            Ok(deleted) => {
                self.tracker.remove(guard, name);
                info!(filename = %name, deleted, "removed document vectors");
                RemoveOutcome {
                    success: true,
                    deleted_count: deleted,
                    error: None,
                }
            }
            Err(e) if e.is_collection_missing() => {
                self.tracker.remove(guard, name);
                RemoveOutcome {
                    success: true,
                    deleted_count: 0,
                    error: None,
                }
            }
            Err(e) => {
                warn!(filename = %name, error = %e, "remove failed");
                RemoveOutcome {
                    success: false,
                    deleted_count: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn remove_by_filter(&self, name: &str) -> Result<u64> {
        let count = self.index.count(Some(name)).await?;
        if count > 0 {
            debug!(filename = %name, count, "untracked document, deleting by filter");
            self.index.delete_by_filename(name).await?;
        }
        Ok(count)
    }

    // ============ Search ============

    /// Search with automatic fallback.
    pub async fn search(&self, query: &str, top_k: usize, min_similarity: f32) -> SearchResponse {
        self.search_with(SearchStrategy::Auto, query, top_k, min_similarity)
            .await
    }

    pub async fn search_with(
        &self,
        strategy: SearchStrategy,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> SearchResponse {
        let method = match strategy {
            SearchStrategy::Keyword => SearchMethod::KeywordFallback,
            _ => SearchMethod::Vector,
        };
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return SearchResponse::ok(method, Vec::new());
        }

        match strategy {
            SearchStrategy::Vector => match self.vector_search(query, top_k, min_similarity).await {
                Ok(results) => SearchResponse::ok(SearchMethod::Vector, results),
                Err(e) => SearchResponse::failed(SearchMethod::Vector, e.to_string()),
            },
            SearchStrategy::Keyword => self.keyword_response(query, top_k).await,
            SearchStrategy::Auto => match self.vector_search(query, top_k, min_similarity).await {
                Ok(results) => SearchResponse::ok(SearchMethod::Vector, results),
                Err(e) => {
                    warn!(error = %e, "vector search failed, falling back to keyword matching");
                    self.keyword_response(query, top_k).await
                }
            },
        }
    }

    async fn vector_search(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchResult>> {
        let params = self.retrieval.rank_params(top_k);
        let vector = self.embedder.embed(query).await?;
        let candidates = self
            .index
            .query(&vector, params.candidate_count(), Some(min_similarity))
            .await?;
        debug!(candidates = candidates.len(), top_k, "vector candidates");
        Ok(rank(candidates, &params))
    }

    async fn keyword_response(&self, query: &str, top_k: usize) -> SearchResponse {
        let page = match self
            .index
            .scroll(self.retrieval.fallback_scan_limit, None, None)
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_collection_missing() => Default::default(),
            Err(e) => {
                warn!(error = %e, "keyword fallback failed");
                return SearchResponse::failed(SearchMethod::KeywordFallback, e.to_string());
            }
        };
        let results = keyword_match(&page.points, query, top_k);
        debug!(scanned = page.points.len(), hits = results.len(), "keyword fallback");
        SearchResponse::ok(SearchMethod::KeywordFallback, results)
    }

    // ============ Stats and reconciliation ============

    pub async fn stats(&self) -> EngineStats {
        let tracked_file_count = self.tracker.len();
        match self.index.count(None).await {
            Ok(record_count) => EngineStats {
                success: true,
                record_count,
                tracked_file_count,
                error: None,
            },
            Err(e) if e.is_collection_missing() => EngineStats {
                success: true,
                record_count: 0,
                tracked_file_count,
                error: None,
            },
            Err(e) => EngineStats {
                success: false,
                record_count: 0,
                tracked_file_count,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn tracked_files(&self) -> Vec<(String, FileEntry)> {
        self.tracker.snapshot()
    }

    /// Rebuild tracker entries by scrolling the whole index.
    ///
    /// Returns the number of documents added to the tracker. Documents
    /// already tracked by this process are left alone.
    pub async fn reconcile(&self) -> Result<usize> {
        let mark = self.tracker.begin_rebuild();
        let mut grouped: HashMap<String, FileEntry> = HashMap::new();
        let mut offset = None;
        loop {
            let page = match self.index.scroll(RECONCILE_PAGE, offset, None).await {
                Ok(page) => page,
                Err(e) if e.is_collection_missing() => return Ok(0),
                Err(e) => return Err(e),
            };
            for point in page.points {
                let processed_at = DateTime::parse_from_rfc3339(&point.payload.timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                let entry = grouped
                    .entry(point.payload.filename.clone())
                    .or_insert_with(|| FileEntry {
                        record_ids: Vec::new(),
                        chunk_count: 0,
                        processed_at,
                        success: true,
                        content_hash: point.payload.content_hash.clone(),
                        error: None,
                    });
                entry.record_ids.push(point.id);
                entry.chunk_count += 1;
                if processed_at > entry.processed_at {
                    entry.processed_at = processed_at;
                }
                // mixed hashes mean a partial overwrite; force a re-index
                if entry.content_hash != point.payload.content_hash {
                    entry.content_hash.clear();
                }
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        let files = grouped.len();
        let added = self.tracker.merge_rebuilt(mark, grouped);
        info!(files, added, "reconciled tracker from index");
        Ok(added)
    }
}
