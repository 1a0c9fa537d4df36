//! Indexing commands.
//!
//! | Command | Function |
//! |---------|----------|
//! | `rag init` | [`run_init`] |
//! | `rag index <name>` | [`run_index`] |
//! | `rag reindex` | [`run_reindex`] |
//! | `rag remove <name>` | [`run_remove`] |
//!
//! These build a fresh engine per invocation and exit non-zero when the
//! store rejects the operation.

use anyhow::{bail, Result};
use tracing::warn;

use rag_harness_core::models::IndexRequest;

use crate::config::Config;
use crate::documents::{DocumentSource, FsDocumentSource};
use crate::engine::build_engine;
use crate::startup::{reindex_all, StartupReport};

pub async fn run_init(config: &Config) -> Result<()> {
    let engine = build_engine(config)?;
    if !engine.ensure_collection().await {
        bail!(
            "could not create collection '{}' at {}",
            engine.collection(),
            config.index.url
        );
    }
    println!(
        "Collection '{}' ready ({} dims).",
        engine.collection(),
        config.embedding.dims
    );
    Ok(())
}

pub async fn run_index(config: &Config, name: &str, priority: Option<bool>) -> Result<()> {
    let source = FsDocumentSource::new(&config.documents)?;
    let content = source.read(name).await?;

    let engine = build_engine(config)?;
    // pick up ids written by earlier runs so they are replaced, not orphaned
    if let Err(e) = engine.reconcile().await {
        warn!(error = %e, "tracker reconciliation failed");
    }

    let mut request = IndexRequest::new(name, content);
    request.priority = priority;
    let outcome = engine.index_document(request).await;
    if !outcome.success {
        bail!(
            "indexing {} failed{}: {}",
            name,
            if outcome.retryable { " (retryable)" } else { "" },
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("Indexed {} ({} chunks).", name, outcome.chunk_count);
    Ok(())
}

pub async fn run_reindex(config: &Config) -> Result<()> {
    let source = FsDocumentSource::new(&config.documents)?;
    let engine = build_engine(config)?;

    let mut report = StartupReport {
        collection_ready: engine.ensure_collection().await,
        ..StartupReport::default()
    };
    match engine.reconcile().await {
        Ok(n) => report.reconciled_files = n,
        Err(e) => warn!(error = %e, "tracker reconciliation failed"),
    }
    reindex_all(&engine, &source, &mut report).await;

    println!("Reindex complete:");
    println!("  indexed:  {}", report.indexed);
    println!("  skipped:  {}", report.skipped);
    println!("  failed:   {}", report.failed);

    if report.failed > 0 {
        bail!("{} document(s) failed to index", report.failed);
    }
    Ok(())
}

pub async fn run_remove(config: &Config, name: &str, keep_file: bool) -> Result<()> {
    let engine = build_engine(config)?;
    let outcome = engine.remove(name).await;
    if !outcome.success {
        bail!(
            "removing {} failed: {}",
            name,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    let file_deleted = if keep_file {
        false
    } else {
        FsDocumentSource::new(&config.documents)?
            .delete(name)
            .await?
    };
    println!(
        "Removed {} ({} vectors{}).",
        name,
        outcome.deleted_count,
        if file_deleted { ", file deleted" } else { "" }
    );
    Ok(())
}
