//! Vector index abstraction for RAG Harness.
//!
//! The [`VectorIndex`] trait defines every operation the engine needs from
//! an external vector store, enabling pluggable backends (Qdrant over
//! HTTP in the application crate, [`memory::InMemoryIndex`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes and
//! must map their transport failures onto [`RetrievalError`], keeping
//! "collection missing" distinct from every other failure.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ScoredPoint, ScrollPage, VectorRecord};

/// A named collection of fixed-dimension vectors compared by cosine distance.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`collection_exists`](VectorIndex::collection_exists) | Describe the collection |
/// | [`create_collection`](VectorIndex::create_collection) | Create it with the configured dimension |
/// | [`upsert`](VectorIndex::upsert) | Write a batch, returning once acknowledged |
/// | [`query`](VectorIndex::query) | Nearest neighbours by similarity |
/// | [`delete_by_ids`](VectorIndex::delete_by_ids) | Fast-path removal |
/// | [`delete_by_filename`](VectorIndex::delete_by_filename) | Filter-based removal |
/// | [`scroll`](VectorIndex::scroll) | Bulk export of stored payloads |
/// | [`count`](VectorIndex::count) | Number of stored records |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Collection name, for logs and stats.
    fn collection(&self) -> &str;

    /// Vector dimension every record must have.
    fn dims(&self) -> usize;

    /// Whether the collection exists.
    async fn collection_exists(&self) -> Result<bool>;

    /// Create the collection. Callers check existence first.
    async fn create_collection(&self) -> Result<()>;

    /// Create the collection if absent. Returns `true` if it was created.
    async fn ensure_collection(&self) -> Result<bool> {
        if self.collection_exists().await? {
            return Ok(false);
        }
        self.create_collection().await?;
        Ok(true)
    }

    /// Write a batch of records. Either the whole batch is acknowledged or
    /// the call fails.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Return up to `top_n` records ordered by descending similarity,
    /// dropping those below `min_score` when given.
    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Delete records by id. Unknown ids are ignored.
    async fn delete_by_ids(&self, ids: &[u64]) -> Result<()>;

    /// Delete every record whose payload `filename` equals `filename`.
    async fn delete_by_filename(&self, filename: &str) -> Result<()>;

    /// Read one page of stored records in id order, optionally restricted
    /// to one filename.
    async fn scroll(
        &self,
        limit: usize,
        offset: Option<u64>,
        filename: Option<&str>,
    ) -> Result<ScrollPage>;

    /// Count stored records, optionally restricted to one filename.
    async fn count(&self, filename: Option<&str>) -> Result<u64>;
}
