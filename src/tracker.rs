//! File lifecycle tracking.
//!
//! Maps each document name to the vector record ids it owns, so that
//! re-indexing and deletion can target exactly those records. The map is
//! process-local: after a restart it is empty until
//! [`RetrievalEngine::reconcile`](crate::engine::RetrievalEngine::reconcile)
//! rebuilds it from the index.
//!
//! Every mutation of a document's records happens while holding that
//! document's lock from [`FileTracker::lock`]. Two uploads of the same name
//! therefore run one after the other, while different names proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Tracking state for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Ids of the records currently stored for the document.
    pub record_ids: Vec<u64>,
    pub chunk_count: usize,
    pub processed_at: DateTime<Utc>,
    pub success: bool,
    /// SHA-256 of the indexed content.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileEntry {
    pub fn indexed(record_ids: Vec<u64>, content_hash: String) -> Self {
        Self {
            chunk_count: record_ids.len(),
            record_ids,
            processed_at: Utc::now(),
            success: true,
            content_hash,
            error: None,
        }
    }

    pub fn failed(content_hash: String, error: impl Into<String>) -> Self {
        Self {
            record_ids: Vec::new(),
            chunk_count: 0,
            processed_at: Utc::now(),
            success: false,
            content_hash,
            error: Some(error.into()),
        }
    }
}

/// Guard proving the holder has exclusive access to one document.
pub type FileGuard = OwnedMutexGuard<()>;

/// Position in the removal log, taken before rebuilding from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildMark(u64);

/// Filename → [`FileEntry`] map with per-filename mutual exclusion.
#[derive(Default)]
pub struct FileTracker {
    entries: RwLock<HashMap<String, FileEntry>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    // filename → sequence number of its latest removal
    removals: Mutex<HashMap<String, u64>>,
    removal_seq: AtomicU64,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `filename`.
    pub async fn lock(&self, filename: &str) -> FileGuard {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // a slot referenced only by the map is neither held nor awaited
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks
                .entry(filename.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    pub fn get(&self, filename: &str) -> Option<FileEntry> {
        self.read().get(filename).cloned()
    }

    /// Record the outcome of processing `filename`.
    pub fn set(&self, _guard: &FileGuard, filename: &str, entry: FileEntry) {
        self.write().insert(filename.to_string(), entry);
        self.removal_log().remove(filename);
    }

    /// Forget `filename`, returning its previous entry.
    pub fn remove(&self, _guard: &FileGuard, filename: &str) -> Option<FileEntry> {
        let removed = self.write().remove(filename);
        let seq = self.removal_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.removal_log().insert(filename.to_string(), seq);
        removed
    }

    /// Mark the start of a rebuild. Pass the mark to
    /// [`merge_rebuilt`](Self::merge_rebuilt) once the index has been read.
    pub fn begin_rebuild(&self) -> RebuildMark {
        RebuildMark(self.removal_seq.load(Ordering::SeqCst))
    }

    /// Merge entries rebuilt from the index into the map.
    ///
    /// Names processed in this process since the rebuild started keep their
    /// current entry. Names removed since `mark` are not brought back.
    pub fn merge_rebuilt(&self, mark: RebuildMark, rebuilt: HashMap<String, FileEntry>) -> usize {
        let mut entries = self.write();
        let mut removals = self.removal_log();
        let mut added = 0;
        for (name, entry) in rebuilt {
            if removals.get(&name).is_some_and(|&seq| seq > mark.0) {
                continue;
            }
            if let std::collections::hash_map::Entry::Vacant(slot) = entries.entry(name) {
                slot.insert(entry);
                added += 1;
            }
        }
        removals.retain(|_, seq| *seq > mark.0);
        added
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, FileEntry)> {
        let mut all: Vec<(String, FileEntry)> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn removal_log(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.removals.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, FileEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, FileEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}
