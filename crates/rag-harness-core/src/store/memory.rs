//! In-memory [`VectorIndex`] implementation for tests and embedded use.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`. Queries are brute-force
//! cosine similarity over every stored vector. Two switches simulate
//! outages so that both retrieval paths can be driven deterministically:
//! [`set_available`](InMemoryIndex::set_available) fails every call, and
//! [`fail_queries`](InMemoryIndex::fail_queries) fails only similarity
//! queries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Result, RetrievalError};
use crate::models::{RecordPayload, ScoredPoint, ScrollPage, StoredPoint, VectorRecord};

use super::VectorIndex;

struct StoredVector {
    vector: Vec<f32>,
    payload: RecordPayload,
}

/// In-memory vector index.
pub struct InMemoryIndex {
    collection: String,
    dims: usize,
    exists: AtomicBool,
    available: AtomicBool,
    queries_fail: AtomicBool,
    points: RwLock<BTreeMap<u64, StoredVector>>,
}

impl InMemoryIndex {
    /// A store with no collection yet; call `ensure_collection` first.
    pub fn new(collection: impl Into<String>, dims: usize) -> Self {
        Self {
            collection: collection.into(),
            dims,
            exists: AtomicBool::new(false),
            available: AtomicBool::new(true),
            queries_fail: AtomicBool::new(false),
            points: RwLock::new(BTreeMap::new()),
        }
    }

    /// A store whose collection already exists.
    pub fn with_collection(collection: impl Into<String>, dims: usize) -> Self {
        let index = Self::new(collection, dims);
        index.exists.store(true, Ordering::SeqCst);
        index
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make similarity queries fail while other calls keep working.
    pub fn fail_queries(&self, fail: bool) {
        self.queries_fail.store(fail, Ordering::SeqCst);
    }

    /// Ids currently stored for `filename`, in ascending order.
    pub fn ids_for(&self, filename: &str) -> Vec<u64> {
        self.read_points()
            .map(|points| {
                points
                    .iter()
                    .filter(|(_, sv)| sv.payload.filename == filename)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(RetrievalError::ServiceUnavailable(
                "in-memory index marked unavailable".into(),
            ));
        }
        if !self.exists.load(Ordering::SeqCst) {
            return Err(RetrievalError::CollectionMissing(self.collection.clone()));
        }
        Ok(())
    }

    fn read_points(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<u64, StoredVector>>> {
        self.points
            .read()
            .map_err(|_| RetrievalError::ServiceUnavailable("index lock poisoned".into()))
    }

    fn write_points(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<u64, StoredVector>>> {
        self.points
            .write()
            .map_err(|_| RetrievalError::ServiceUnavailable("index lock poisoned".into()))
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn collection_exists(&self) -> Result<bool> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(RetrievalError::ServiceUnavailable(
                "in-memory index marked unavailable".into(),
            ));
        }
        Ok(self.exists.load(Ordering::SeqCst))
    }

    async fn create_collection(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(RetrievalError::ServiceUnavailable(
                "in-memory index marked unavailable".into(),
            ));
        }
        self.exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        self.check()?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dims) {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dims,
                actual: bad.vector.len(),
            });
        }
        let mut points = self.write_points()?;
        for r in records {
            points.insert(
                r.id,
                StoredVector {
                    vector: r.vector.clone(),
                    payload: r.payload.clone(),
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        self.check()?;
        if self.queries_fail.load(Ordering::SeqCst) {
            return Err(RetrievalError::ServiceUnavailable(
                "similarity queries disabled".into(),
            ));
        }
        if vector.len() != self.dims {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        let points = self.read_points()?;
        let mut hits: Vec<ScoredPoint> = points
            .iter()
            .map(|(id, sv)| ScoredPoint {
                id: *id,
                score: cosine_similarity(vector, &sv.vector),
                payload: sv.payload.clone(),
            })
            .filter(|hit| min_score.map_or(true, |min| hit.score >= min))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(top_n);
        Ok(hits)
    }

    async fn delete_by_ids(&self, ids: &[u64]) -> Result<()> {
        self.check()?;
        let mut points = self.write_points()?;
        for id in ids {
            points.remove(id);
        }
        Ok(())
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<()> {
        self.check()?;
        let mut points = self.write_points()?;
        points.retain(|_, sv| sv.payload.filename != filename);
        Ok(())
    }

    async fn scroll(
        &self,
        limit: usize,
        offset: Option<u64>,
        filename: Option<&str>,
    ) -> Result<ScrollPage> {
        self.check()?;
        let points = self.read_points()?;
        let mut matching = points
            .range(offset.unwrap_or(0)..)
            .filter(|(_, sv)| filename.map_or(true, |f| sv.payload.filename == f));

        let page: Vec<StoredPoint> = matching
            .by_ref()
            .take(limit)
            .map(|(id, sv)| StoredPoint {
                id: *id,
                payload: sv.payload.clone(),
            })
            .collect();
        let next_offset = matching.next().map(|(id, _)| *id);

        Ok(ScrollPage {
            points: page,
            next_offset,
        })
    }

    async fn count(&self, filename: Option<&str>) -> Result<u64> {
        self.check()?;
        let points = self.read_points()?;
        let n = points
            .values()
            .filter(|sv| filename.map_or(true, |f| sv.payload.filename == f))
            .count();
        Ok(n as u64)
    }
}
