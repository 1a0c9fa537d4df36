//! # RAG Harness CLI (`rag`)
//!
//! The `rag` binary manages the document index and serves the HTTP API
//! that chat front ends call for retrieval.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the vector collection if absent |
//! | `rag serve` | Run startup re-indexing and the HTTP API |
//! | `rag index <name>` | Index one document from the document root |
//! | `rag reindex` | Index every changed document in the document root |
//! | `rag search "<query>"` | Search with automatic keyword fallback |
//! | `rag remove <name>` | Delete a document's vectors (and file) |
//! | `rag stats` | Show record and document counts |
//!
//! ## Examples
//!
//! ```bash
//! # Create the collection in a local Qdrant
//! rag init
//!
//! # Force the keyword path, e.g. while the store is being rebuilt
//! rag search "search threshold" --strategy keyword
//!
//! # Serve with JSON logs
//! rag --json-logs serve
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rag_harness::{config, ingest, search, server, stats};

/// RAG Harness: chunk, embed, index and search documents for chat front ends.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness: retrieval over user documents for chat front ends",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag.toml`.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector collection if it does not exist.
    Init,

    /// Start the HTTP server.
    ///
    /// Startup (grace delay, reconciliation, re-indexing) runs in the
    /// background; `/health` reports when it has finished.
    Serve,

    /// Index one document from the document root.
    Index {
        /// Document name relative to `[documents].root`.
        name: String,

        /// Boost this document in ranking regardless of its name.
        #[arg(long, conflicts_with = "no_priority")]
        priority: bool,

        /// Never boost this document.
        #[arg(long)]
        no_priority: bool,
    },

    /// Index every document whose content changed since it was last indexed.
    Reindex,

    /// Search indexed documents.
    Search {
        query: String,

        /// Number of results (default: `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum vector similarity (default: `[retrieval].min_similarity`).
        #[arg(long)]
        min_similarity: Option<f32>,

        /// `auto`, `vector`, or `keyword`.
        #[arg(long, default_value = "auto")]
        strategy: String,
    },

    /// Delete a document's vectors and its file.
    Remove {
        name: String,

        /// Delete only the vectors, keeping the file on disk.
        #[arg(long)]
        keep_file: bool,
    },

    /// Show index statistics.
    Stats,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let cfg = config::load_config(&cli.config)?;
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Init => ingest::run_init(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Index {
            name,
            priority,
            no_priority,
        } => {
            let priority = match (priority, no_priority) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            ingest::run_index(&cfg, &name, priority).await?;
        }
        Commands::Reindex => ingest::run_reindex(&cfg).await?,
        Commands::Search {
            query,
            top_k,
            min_similarity,
            strategy,
        } => {
            search::run_search(&cfg, &query, top_k, min_similarity, &strategy).await?;
        }
        Commands::Remove { name, keep_file } => {
            ingest::run_remove(&cfg, &name, keep_file).await?;
        }
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}
