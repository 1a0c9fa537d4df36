//! Startup sequence: wait for the store, reconcile, re-index.
//!
//! Runs once per process, sequentially:
//!
//! 1. Sleep `startup.grace_secs` so a store started alongside us can come up.
//! 2. Ensure the collection exists (failure is logged, not fatal).
//! 3. If `startup.reconcile`, rebuild the tracker from the index.
//! 4. If `startup.reindex`, index every document in the source, skipping
//!    documents whose content hash matches a successful tracker entry.
//! 5. Mark the engine's startup as complete.
//!
//! Each document is indexed under its per-filename lock, so uploads that
//! arrive while this runs are serialized with it rather than racing it.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use rag_harness_core::models::IndexRequest;

use crate::config::StartupConfig;
use crate::documents::DocumentSource;
use crate::engine::RetrievalEngine;

/// Counters reported once startup finishes.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupReport {
    pub collection_ready: bool,
    pub reconciled_files: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run_startup(
    engine: &RetrievalEngine,
    source: &dyn DocumentSource,
    config: &StartupConfig,
) -> StartupReport {
    if config.grace_secs > 0 {
        info!(secs = config.grace_secs, "waiting for vector store");
        tokio::time::sleep(Duration::from_secs(config.grace_secs)).await;
    }

    let mut report = StartupReport {
        collection_ready: engine.ensure_collection().await,
        ..StartupReport::default()
    };

    if config.reconcile {
        match engine.reconcile().await {
            Ok(n) => report.reconciled_files = n,
            Err(e) => warn!(error = %e, "tracker reconciliation failed"),
        }
    }

    if config.reindex {
        reindex_all(engine, source, &mut report).await;
    }

    engine.mark_startup_complete();
    info!(
        indexed = report.indexed,
        skipped = report.skipped,
        failed = report.failed,
        reconciled = report.reconciled_files,
        "startup complete"
    );
    report
}

/// Index every document in `source` whose content changed since it was
/// last indexed.
pub async fn reindex_all(
    engine: &RetrievalEngine,
    source: &dyn DocumentSource,
    report: &mut StartupReport,
) {
    let docs = match source.list().await {
        Ok(docs) => docs,
        Err(e) => {
            warn!(error = %e, "could not list documents");
            return;
        }
    };

    for doc in docs {
        // read under the lock so a concurrent upload is never overwritten
        // with the content seen before it
        let guard = engine.lock_document(&doc.name).await;
        let content = match source.read(&doc.name).await {
            Ok(content) => content,
            Err(e) => {
                warn!(filename = %doc.name, error = %e, "could not read document");
                report.failed += 1;
                continue;
            }
        };
        match engine
            .index_if_changed_locked(&guard, IndexRequest::new(doc.name.clone(), content))
            .await
        {
            None => report.skipped += 1,
            Some(outcome) if outcome.success => report.indexed += 1,
            Some(_) => report.failed += 1,
        }
    }
}
