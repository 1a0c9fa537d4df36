//! Index statistics.
//!
//! `rag stats` prints the record count of the configured collection and
//! the documents tracked by this process. A fresh CLI process tracks
//! nothing until it reconciles, so the command reconciles first.

use anyhow::Result;

use crate::config::Config;
use crate::engine::build_engine;

pub async fn run_stats(config: &Config) -> Result<()> {
    let engine = build_engine(config)?;
    if let Err(e) = engine.reconcile().await {
        tracing::warn!(error = %e, "reconcile failed, tracked counts will be empty");
    }
    let stats = engine.stats().await;

    println!("RAG Harness: Index Stats");
    println!("=========================");
    println!();
    println!("  Store:       {}", config.index.url);
    println!("  Collection:  {}", engine.collection());
    if stats.success {
        println!("  Records:     {}", stats.record_count);
    } else {
        println!(
            "  Records:     unavailable ({})",
            stats.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("  Documents:   {}", stats.tracked_file_count);

    let files = engine.tracked_files();
    if !files.is_empty() {
        println!();
        println!("  {:<40} {:>8}  {}", "DOCUMENT", "CHUNKS", "INDEXED");
        println!("  {}", "-".repeat(72));
        for (name, entry) in files {
            println!(
                "  {:<40} {:>8}  {}",
                name,
                entry.chunk_count,
                format_ts_relative(entry.processed_at.timestamp())
            );
        }
    }
    println!();
    Ok(())
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
