//! Core data models used throughout RAG Harness.
//!
//! These types represent the chunks, vector records and result envelopes
//! that flow through the indexing and retrieval pipeline. Envelope types
//! serialize in camelCase because they are handed straight to HTTP clients;
//! record payloads keep the snake_case field names stored in the index.

use serde::{Deserialize, Serialize};

/// A bounded window of a document's words.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Name of the owning document.
    pub document: String,
    /// Position within the document, starting at 0.
    pub index: usize,
    /// Number of chunks produced for the document.
    pub total: usize,
    pub text: String,
}

/// Metadata stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    #[serde(alias = "content")]
    pub text: String,
    pub filename: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub content_hash: String,
}

/// A point written to the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: RecordPayload,
}

/// A nearest-neighbour hit returned by [`VectorIndex::query`](crate::store::VectorIndex::query).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f32,
    pub payload: RecordPayload,
}

/// A stored point returned by a scroll, without its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub id: u64,
    pub payload: RecordPayload,
}

/// One page of a bulk scroll over the index.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<StoredPoint>,
    /// Offset to pass to the next scroll call, `None` on the last page.
    pub next_offset: Option<u64>,
}

/// A document submitted for indexing.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub name: String,
    pub content: String,
    /// Explicit ranking priority. Derived from the configured name
    /// patterns when absent.
    pub priority: Option<bool>,
}

impl IndexRequest {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Which retrieval path produced a [`SearchResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "keyword-fallback")]
    KeywordFallback,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Vector => "vector",
            SearchMethod::KeywordFallback => "keyword-fallback",
        }
    }
}

/// A ranked chunk returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub filename: String,
    pub text: String,
    /// Raw similarity reported by the retrieval path.
    pub similarity: f32,
    /// Similarity after priority boosting; equals `similarity` when unboosted.
    pub boosted_similarity: f32,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub priority: bool,
}

/// Envelope returned by every search, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub method: SearchMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn ok(method: SearchMethod, results: Vec<SearchResult>) -> Self {
        Self {
            success: true,
            total_results: results.len(),
            results,
            method,
            error: None,
        }
    }

    pub fn failed(method: SearchMethod, error: impl Into<String>) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            total_results: 0,
            method,
            error: Some(error.into()),
        }
    }
}

/// Result of indexing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutcome {
    pub success: bool,
    pub filename: String,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether retrying the same document later may succeed.
    #[serde(default)]
    pub retryable: bool,
}

/// Result of removing one document's vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub success: bool,
    pub deleted_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Index-wide counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub success: bool,
    pub record_count: u64,
    pub tracked_file_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
