//! Error taxonomy shared by the index client, the embedders and the engine.
//!
//! Every external-call failure is converted into a [`RetrievalError`]
//! before it reaches the engine. The engine in turn folds these into
//! structured result envelopes; no error crosses its public boundary.

use thiserror::Error;

/// Convenience alias used throughout the core and by index implementations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// The vector store could not be reached at all.
    #[error("vector store unavailable: {0}")]
    ServiceUnavailable(String),

    /// The configured collection does not exist. Recoverable by creating it.
    #[error("collection '{0}' not found")]
    CollectionMissing(String),

    /// The store answered, but not in the shape we expected.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The store rejected the request with a non-success status.
    #[error("vector store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A vector does not match the collection dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A document's chunk batch could not be written. The whole batch is lost.
    #[error("batch of {chunks} chunks for '{filename}' failed: {source}")]
    TotalBatchFailure {
        filename: String,
        chunks: usize,
        #[source]
        source: Box<RetrievalError>,
    },

    /// Local embedding computation failed.
    #[error("embedding failed: {0}")]
    EmbeddingCompute(String),
}

impl RetrievalError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::ServiceUnavailable(_) | RetrievalError::Timeout(_) => true,
            RetrievalError::Rejected { status, .. } => *status == 429 || *status >= 500,
            RetrievalError::TotalBatchFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn is_collection_missing(&self) -> bool {
        matches!(self, RetrievalError::CollectionMissing(_))
    }
}
