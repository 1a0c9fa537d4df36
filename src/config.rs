//! TOML configuration parsing and validation.
//!
//! Every section carries serde defaults, so an empty file is a valid
//! configuration pointing at a local Qdrant on `localhost:6333` and a
//! `./data/documents` directory.
//!
//! ```toml
//! [documents]
//! root = "./data/documents"
//!
//! [chunking]
//! chunk_words = 200
//! overlap_words = 40
//!
//! [index]
//! url = "http://localhost:6333"
//! collection = "documents"
//!
//! [retrieval]
//! top_k = 5
//! min_similarity = 0.3
//! priority_patterns = ["admin", "config"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use rag_harness_core::chunk::ChunkParams;
use rag_harness_core::embedding::EMBEDDING_DIMS;
use rag_harness_core::search::RankParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./data/documents")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.json".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
    #[serde(default = "default_min_chunk_words")]
    pub min_chunk_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_words: default_chunk_words(),
            overlap_words: default_overlap_words(),
            min_chunk_words: default_min_chunk_words(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams::new(self.chunk_words, self.overlap_words, self.min_chunk_words)
    }
}

fn default_chunk_words() -> usize {
    200
}
fn default_overlap_words() -> usize {
    40
}
fn default_min_chunk_words() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hashing` (built-in) or `http` (external embedding service).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub noise_amplitude: f32,
    #[serde(default)]
    pub noise_seed: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            dims: default_dims(),
            noise_amplitude: 0.0,
            noise_seed: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_dims() -> usize {
    EMBEDDING_DIMS
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Environment variable holding the store API key, if any.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Upper bound for every store call, including acknowledged upserts.
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            collection: default_collection(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}
fn default_index_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_over_fetch")]
    pub over_fetch: usize,
    #[serde(default = "default_boost_factor")]
    pub boost_factor: f32,
    #[serde(default = "default_priority_patterns")]
    pub priority_patterns: Vec<String>,
    /// Chunks scanned by the keyword fallback.
    #[serde(default = "default_fallback_scan_limit")]
    pub fallback_scan_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            over_fetch: default_over_fetch(),
            boost_factor: default_boost_factor(),
            priority_patterns: default_priority_patterns(),
            fallback_scan_limit: default_fallback_scan_limit(),
        }
    }
}

impl RetrievalConfig {
    /// Ranking parameters for one query. `top_k` is capped at
    /// `fallback_scan_limit` so the candidate request stays bounded.
    pub fn rank_params(&self, top_k: usize) -> RankParams {
        RankParams {
            top_k: top_k.min(self.fallback_scan_limit.max(1)),
            over_fetch: self.over_fetch,
            boost_factor: self.boost_factor,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.3
}
fn default_over_fetch() -> usize {
    3
}
fn default_boost_factor() -> f32 {
    1.3
}
fn default_priority_patterns() -> Vec<String> {
    vec!["admin".to_string(), "config".to_string()]
}
fn default_fallback_scan_limit() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    /// Delay before the first store call, giving the store time to come up.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Rebuild the file tracker from the index.
    #[serde(default = "default_true")]
    pub reconcile: bool,
    /// Index every document found in the document root.
    #[serde(default = "default_true")]
    pub reindex: bool,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            reconcile: true,
            reindex: true,
        }
    }
}

fn default_grace_secs() -> u64 {
    2
}
fn default_true() -> bool {
    true
}

impl EmbeddingConfig {
    pub fn is_http(&self) -> bool {
        self.provider == "http"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_words == 0 {
        bail!("chunking.chunk_words must be > 0");
    }
    if config.chunking.overlap_words >= config.chunking.chunk_words {
        bail!("chunking.overlap_words must be < chunking.chunk_words");
    }
    if config.chunking.min_chunk_words > config.chunking.chunk_words {
        bail!("chunking.min_chunk_words must be <= chunking.chunk_words");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hashing" => {
            if config.embedding.dims != EMBEDDING_DIMS {
                bail!(
                    "embedding.dims must be {} for the hashing provider",
                    EMBEDDING_DIMS
                );
            }
        }
        "http" => {
            if config.embedding.url.is_none() {
                bail!("embedding.url must be specified when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hashing or http.",
            other
        ),
    }

    // Validate index
    if !(config.index.url.starts_with("http://") || config.index.url.starts_with("https://")) {
        bail!("index.url must be an http(s) URL");
    }
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(1..=10).contains(&config.retrieval.over_fetch) {
        bail!("retrieval.over_fetch must be in [1, 10]");
    }
    if config.retrieval.boost_factor < 1.0 {
        bail!("retrieval.boost_factor must be >= 1.0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_similarity) {
        bail!("retrieval.min_similarity must be in [0.0, 1.0]");
    }
    if config.retrieval.fallback_scan_limit == 0 {
        bail!("retrieval.fallback_scan_limit must be >= 1");
    }

    Ok(())
}
