//! # RAG Harness Core
//!
//! Runtime-free retrieval logic for RAG Harness: data models, the
//! sliding-window chunker, the [`embedding::Embedder`] trait with its
//! hashing implementation, the [`store::VectorIndex`] trait, ranking and
//! the keyword fallback.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O. The
//! application crate supplies a Qdrant-backed index, the document source
//! and the engine that ties everything together.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{Result, RetrievalError};
