//! HTTP API for chat front ends.
//!
//! Exposes the retrieval engine and the document source over JSON HTTP.
//! Uploads are written to disk first and then indexed; when indexing fails
//! the upload still succeeds and the response reports
//! `"vectorization": "failed"`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Status, version, store reachability, startup state |
//! | `POST`   | `/collections/init` | Create the collection if absent |
//! | `GET`    | `/files` | Documents on disk with their tracker state |
//! | `PUT`    | `/files/{*name}` | Upload raw text and index it |
//! | `DELETE` | `/files/{*name}` | Remove a document's vectors and file |
//! | `POST`   | `/search` | `{query, topK?, minSimilarity?, strategy?}` |
//! | `GET`    | `/vectors/stats` | Record and tracked-file counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "topK must be >= 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based chat
//! front ends can call the API directly.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use rag_harness_core::models::{EngineStats, IndexRequest, SearchResponse};
use rag_harness_core::search::SearchStrategy;

use crate::config::Config;
use crate::documents::{validate_name, DocumentInfo, DocumentSource, FsDocumentSource};
use crate::engine::{build_engine, RetrievalEngine};
use crate::startup::run_startup;
use crate::tracker::FileEntry;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<RetrievalEngine>,
    documents: Arc<dyn DocumentSource>,
}

impl AppState {
    pub fn new(engine: Arc<RetrievalEngine>, documents: Arc<dyn DocumentSource>) -> Self {
        Self { engine, documents }
    }
}

/// Build the router with every route and the CORS layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/collections/init", post(handle_init_collection))
        .route("/files", get(handle_list_files))
        .route("/files/{*name}", put(handle_upload).delete(handle_delete))
        .route("/search", post(handle_search))
        .route("/vectors/stats", get(handle_stats))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, then runs the startup sequence in the
/// background so the API answers health checks while documents are
/// being re-indexed.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(build_engine(config)?);
    let documents: Arc<dyn DocumentSource> = Arc::new(FsDocumentSource::new(&config.documents)?);

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "RAG server listening");

    let startup = config.startup.clone();
    let (bg_engine, bg_docs) = (engine.clone(), documents.clone());
    tokio::spawn(async move {
        run_startup(&bg_engine, bg_docs.as_ref(), &startup).await;
    });

    serve(listener, AppState::new(engine, documents)).await
}

/// Serve the API on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    /// `"ok"` when the store is reachable, `"degraded"` otherwise.
    status: String,
    version: String,
    store: String,
    startup_complete: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = state.engine.store_reachable().await;
    Json(HealthResponse {
        status: if reachable { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if reachable { "reachable" } else { "unreachable" }.to_string(),
        startup_complete: state.engine.startup_complete(),
    })
}

// ============ POST /collections/init ============

#[derive(Serialize)]
struct InitResponse {
    success: bool,
    collection: String,
}

async fn handle_init_collection(
    State(state): State<AppState>,
) -> Result<Json<InitResponse>, AppError> {
    if !state.engine.ensure_collection().await {
        return Err(internal(format!(
            "could not create collection '{}'",
            state.engine.collection()
        )));
    }
    Ok(Json(InitResponse {
        success: true,
        collection: state.engine.collection().to_string(),
    }))
}

// ============ GET /files ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileListing {
    #[serde(flatten)]
    info: DocumentInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<FileEntry>,
}

#[derive(Serialize)]
struct FileListResponse {
    files: Vec<FileListing>,
}

async fn handle_list_files(
    State(state): State<AppState>,
) -> Result<Json<FileListResponse>, AppError> {
    let docs = state
        .documents
        .list()
        .await
        .map_err(|e| internal(e.to_string()))?;
    let files = docs
        .into_iter()
        .map(|info| FileListing {
            index: state.engine.tracker().get(&info.name),
            info,
        })
        .collect();
    Ok(Json(FileListResponse { files }))
}

// ============ PUT /files/{*name} ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    filename: String,
    saved: bool,
    /// `"ok"` or `"failed"`.
    vectorization: String,
    chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    retryable: bool,
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Json<UploadResponse>, AppError> {
    validate_name(&name).map_err(|e| bad_request(e.to_string()))?;

    // the file and its records change together under the document lock
    let guard = state.engine.lock_document(&name).await;
    state
        .documents
        .write(&name, &body)
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    let outcome = state
        .engine
        .index_document_locked(&guard, IndexRequest::new(name.clone(), body))
        .await;
    drop(guard);
    if !outcome.success {
        warn!(filename = %name, "saved but not vectorized");
    }

    Ok(Json(UploadResponse {
        filename: name,
        saved: true,
        vectorization: if outcome.success { "ok" } else { "failed" }.to_string(),
        chunk_count: outcome.chunk_count,
        error: outcome.error,
        retryable: outcome.retryable,
    }))
}

// ============ DELETE /files/{*name} ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    filename: String,
    deleted_count: u64,
    file_deleted: bool,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    validate_name(&name).map_err(|e| bad_request(e.to_string()))?;

    let guard = state.engine.lock_document(&name).await;
    let on_disk = state
        .documents
        .exists(&name)
        .await
        .map_err(|e| internal(e.to_string()))?;
    let tracked = state.engine.tracker().get(&name).is_some();

    let outcome = state.engine.remove_locked(&guard, &name).await;
    if !outcome.success {
        return Err(internal(
            outcome
                .error
                .unwrap_or_else(|| "vector removal failed".to_string()),
        ));
    }
    if !on_disk && !tracked && outcome.deleted_count == 0 {
        return Err(not_found(format!("no such document: {}", name)));
    }

    let file_deleted = state
        .documents
        .delete(&name)
        .await
        .map_err(|e| internal(e.to_string()))?;
    drop(guard);

    Ok(Json(DeleteResponse {
        filename: name,
        deleted_count: outcome.deleted_count,
        file_deleted,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    min_similarity: Option<f32>,
    #[serde(default)]
    strategy: SearchStrategy,
}

async fn handle_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let defaults = state.engine.retrieval();

    let top_k = req.top_k.unwrap_or(defaults.top_k);
    if top_k == 0 {
        return Err(bad_request("topK must be >= 1"));
    }
    let min_similarity = req.min_similarity.unwrap_or(defaults.min_similarity);
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(bad_request("minSimilarity must be in [0, 1]"));
    }

    let response = state
        .engine
        .search_with(req.strategy, &req.query, top_k, min_similarity)
        .await;
    Ok(Json(response))
}

// ============ GET /vectors/stats ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(flatten)]
    stats: EngineStats,
    collection: String,
}

async fn handle_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.engine.stats().await,
        collection: state.engine.collection().to_string(),
    })
}
