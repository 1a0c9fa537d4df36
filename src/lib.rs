//! # RAG Harness
//!
//! A self-hosted retrieval engine for chat front ends.
//!
//! RAG Harness splits user documents into overlapping word windows, turns
//! each window into a fixed-size feature vector, stores the vectors in a
//! Qdrant collection and answers similarity queries with priority
//! boosting. When the vector path fails it hands the query to a literal
//! keyword matcher over stored chunk text, so search keeps answering while
//! the store is degraded.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │  Documents  │──▶│ RetrievalEngine  │──▶│  Qdrant  │
//! │ (data dir)  │   │ chunk+embed+rank │   │  (REST)  │
//! └─────────────┘   └────────┬─────────┘   └──────────┘
//!                            │
//!                 ┌──────────┴─────────┐
//!                 ▼                    ▼
//!            ┌──────────┐        ┌──────────┐
//!            │   CLI    │        │   HTTP   │
//!            │  (rag)   │        │  (axum)  │
//!            └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                        # create the collection
//! rag reindex                     # index ./data/documents
//! rag search "search threshold"
//! rag serve                       # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`documents`] | Document source trait and filesystem implementation |
//! | [`embedding`] | Embedder construction, HTTP embedding client |
//! | [`qdrant`] | Qdrant REST vector index |
//! | [`tracker`] | Per-document record tracking and locking |
//! | [`engine`] | Retrieval engine: index, search, remove, stats |
//! | [`startup`] | Grace delay, reconciliation, startup re-index |
//! | [`server`] | HTTP API |
//! | [`ingest`], [`search`], [`stats`] | CLI commands |
//!
//! Runtime-free building blocks (chunker, hashing embedder, ranking,
//! in-memory index) live in the `rag-harness-core` crate.

pub mod config;
pub mod documents;
pub mod embedding;
pub mod engine;
pub mod ingest;
pub mod qdrant;
pub mod search;
pub mod server;
pub mod startup;
pub mod stats;
pub mod tracker;
