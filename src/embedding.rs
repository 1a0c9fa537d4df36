//! Embedder construction and the HTTP embedding client.
//!
//! Two providers implement [`Embedder`]:
//! - **`hashing`**: [`HashingEmbedder`] from the core crate; local, cheap,
//!   lexical. The default.
//! - **`http`**: [`HttpEmbedder`]; calls an external embedding service's
//!   `POST {url}/embed` endpoint with `{"text": ...}` and reads
//!   `{"embedding": [...]}`.
//!
//! # Retry Strategy
//!
//! The HTTP provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: base, 2×base, 4×base, … (capped at 2^5 × base)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use rag_harness_core::embedding::{Embedder, HashingEmbedder};
use rag_harness_core::error::{Result, RetrievalError};

use crate::config::EmbeddingConfig;

/// Build the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::with_noise(
            config.noise_amplitude,
            config.noise_seed,
        ))),
        "http" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

/// Embedding provider backed by an external HTTP service.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    dims: usize,
    max_retries: u32,
    backoff_base: Duration,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Create a new HTTP provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not set or the HTTP client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.url required for http provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            dims: config.dims,
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << (attempt - 1).min(5))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        "http"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "text": text });
        let endpoint = format!("{}/embed", self.url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }

            let resp = self.client.post(&endpoint).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbedResponse = response
                            .json()
                            .await
                            .map_err(|e| RetrievalError::MalformedResponse(e.to_string()))?;
                        if parsed.embedding.len() != self.dims {
                            return Err(RetrievalError::DimensionMismatch {
                                expected: self.dims,
                                actual: parsed.embedding.len(),
                            });
                        }
                        return Ok(parsed.embedding);
                    }

                    let message = response.text().await.unwrap_or_default();
                    let err = RetrievalError::EmbeddingCompute(format!(
                        "embedding service error {}: {}",
                        status, message
                    ));

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(RetrievalError::Timeout(e.to_string()));
                }
                Err(e) => {
                    last_err = Some(RetrievalError::ServiceUnavailable(format!(
                        "embedding service unreachable at {}: {}",
                        self.url, e
                    )));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            RetrievalError::EmbeddingCompute("embedding failed after retries".into())
        }))
    }
}
