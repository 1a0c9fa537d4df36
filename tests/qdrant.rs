//! Qdrant client against an in-process mock of the Qdrant REST API.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use rag_harness::config::RetrievalConfig;
use rag_harness::engine::RetrievalEngine;
use rag_harness::qdrant::QdrantIndex;
use rag_harness_core::chunk::ChunkParams;
use rag_harness_core::embedding::{cosine_similarity, HashingEmbedder, EMBEDDING_DIMS};
use rag_harness_core::error::RetrievalError;
use rag_harness_core::models::{RecordPayload, SearchMethod, VectorRecord};
use rag_harness_core::store::VectorIndex;

#[derive(Default)]
struct MockQdrant {
    collection: Option<(String, usize)>,
    points: BTreeMap<u64, (Vec<f32>, Value)>,
    api_keys: Vec<String>,
}

type Shared = Arc<Mutex<MockQdrant>>;

fn ok(result: Value) -> Response {
    Json(json!({ "result": result, "status": "ok", "time": 0.0 })).into_response()
}

fn missing(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": { "error": format!("Collection `{}` doesn't exist!", name) } })),
    )
        .into_response()
}

fn matches_filter(payload: &Value, filter: Option<&Value>) -> bool {
    let Some(filter) = filter else { return true };
    filter["must"]
        .as_array()
        .map(|conds| {
            conds
                .iter()
                .all(|c| payload[c["key"].as_str().unwrap_or("")] == c["match"]["value"])
        })
        .unwrap_or(true)
}

fn record_key(state: &Shared, headers: &HeaderMap) {
    if let Some(key) = headers.get("api-key").and_then(|v| v.to_str().ok()) {
        state.lock().unwrap().api_keys.push(key.to_string());
    }
}

async fn describe(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    record_key(&state, &headers);
    match &state.lock().unwrap().collection {
        Some((c, dims)) if *c == name => ok(json!({ "config": { "params": { "vectors": { "size": dims } } } })),
        _ => missing(&name),
    }
}

async fn create(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let dims = body["vectors"]["size"].as_u64().unwrap_or(0) as usize;
    state.lock().unwrap().collection = Some((name, dims));
    ok(json!(true))
}

async fn upsert(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    if s.collection.as_ref().map(|(c, _)| c != &name).unwrap_or(true) {
        return missing(&name);
    }
    for p in body["points"].as_array().cloned().unwrap_or_default() {
        let id = p["id"].as_u64().unwrap();
        let vector: Vec<f32> = serde_json::from_value(p["vector"].clone()).unwrap();
        s.points.insert(id, (vector, p["payload"].clone()));
    }
    ok(json!({ "operation_id": 1, "status": "completed" }))
}

async fn points_op(
    State(state): State<Shared>,
    Path((name, op)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    if s.collection.as_ref().map(|(c, _)| c != &name).unwrap_or(true) {
        return missing(&name);
    }
    let filter = body.get("filter");

    match op.as_str() {
        "search" => {
            let query: Vec<f32> = serde_json::from_value(body["vector"].clone()).unwrap();
            let limit = body["limit"].as_u64().unwrap_or(10) as usize;
            let threshold = body.get("score_threshold").and_then(Value::as_f64);
            let mut hits: Vec<(u64, f32, Value)> = s
                .points
                .iter()
                .map(|(id, (v, p))| (*id, cosine_similarity(&query, v), p.clone()))
                .filter(|(_, score, _)| threshold.map_or(true, |t| *score as f64 >= t))
                .collect();
            hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
            hits.truncate(limit);
            ok(Value::Array(
                hits.into_iter()
                    .map(|(id, score, payload)| json!({ "id": id, "version": 0, "score": score, "payload": payload }))
                    .collect(),
            ))
        }
        "delete" => {
            if let Some(ids) = body["points"].as_array() {
                for id in ids {
                    s.points.remove(&id.as_u64().unwrap());
                }
            } else {
                s.points.retain(|_, (_, p)| !matches_filter(p, filter));
            }
            ok(json!({ "operation_id": 2, "status": "completed" }))
        }
        "scroll" => {
            let limit = body["limit"].as_u64().unwrap_or(10) as usize;
            let offset = body["offset"].as_u64().unwrap_or(0);
            let mut matching = s
                .points
                .range(offset..)
                .filter(|(_, (_, p))| matches_filter(p, filter));
            let page: Vec<Value> = matching
                .by_ref()
                .take(limit)
                .map(|(id, (_, p))| json!({ "id": id, "payload": p }))
                .collect();
            let next = matching.next().map(|(id, _)| json!(id)).unwrap_or(Value::Null);
            ok(json!({ "points": page, "next_page_offset": next }))
        }
        "count" => {
            let n = s
                .points
                .values()
                .filter(|(_, p)| matches_filter(p, filter))
                .count();
            ok(json!({ "count": n }))
        }
        _ => (StatusCode::BAD_REQUEST, "unknown op").into_response(),
    }
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_mock() -> (SocketAddr, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockQdrant::default()));
    let app = Router::new()
        .route("/collections/{name}", get(describe).put(create))
        .route("/collections/{name}/points", put(upsert))
        .route("/collections/{name}/points/{op}", post(points_op))
        .with_state(state.clone());
    (spawn(app).await, state)
}

fn client(addr: SocketAddr, dims: usize, api_key: Option<&str>) -> QdrantIndex {
    QdrantIndex::with_api_key(
        &format!("http://{}", addr),
        "documents",
        dims,
        Duration::from_secs(5),
        api_key,
    )
    .unwrap()
}

fn record(id: u64, filename: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord {
        id,
        vector,
        payload: RecordPayload {
            text: format!("chunk {} of {}", id, filename),
            filename: filename.to_string(),
            chunk_index: 0,
            total_chunks: 1,
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            priority: false,
            content_hash: "abc".to_string(),
        },
    }
}

#[tokio::test]
async fn test_ensure_collection_creates_once() {
    let (addr, state) = spawn_mock().await;
    let index = client(addr, 3, Some("secret"));

    assert!(index.ensure_collection().await.unwrap());
    assert!(!index.ensure_collection().await.unwrap());
    let s = state.lock().unwrap();
    assert_eq!(s.collection, Some(("documents".to_string(), 3)));
    assert!(s.api_keys.iter().all(|k| k == "secret"));
    assert!(!s.api_keys.is_empty());
}

#[tokio::test]
async fn test_missing_collection_is_distinct() {
    let (addr, _) = spawn_mock().await;
    let index = client(addr, 3, None);

    let err = index.query(&[1.0, 0.0, 0.0], 5, None).await.unwrap_err();
    assert!(err.is_collection_missing(), "unexpected error: {}", err);
    assert!(!index.collection_exists().await.unwrap());
}

#[tokio::test]
async fn test_upsert_query_scroll_count_delete() {
    let (addr, _) = spawn_mock().await;
    let index = client(addr, 3, None);
    index.ensure_collection().await.unwrap();

    index
        .upsert(&[
            record(1, "a.txt", vec![1.0, 0.0, 0.0]),
            record(2, "a.txt", vec![0.0, 1.0, 0.0]),
            record(3, "b.txt", vec![0.7, 0.7, 0.0]),
        ])
        .await
        .unwrap();

    let hits = index.query(&[1.0, 0.0, 0.0], 2, Some(0.1)).await.unwrap();
    assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(hits[0].payload.filename, "a.txt");
    assert_eq!(hits[0].payload.content_hash, "abc");

    let first = index.scroll(2, None, None).await.unwrap();
    assert_eq!(first.points.len(), 2);
    assert_eq!(first.next_offset, Some(3));
    let rest = index.scroll(2, first.next_offset, None).await.unwrap();
    assert_eq!(rest.points.len(), 1);
    assert_eq!(rest.next_offset, None);

    assert_eq!(index.count(None).await.unwrap(), 3);
    assert_eq!(index.count(Some("a.txt")).await.unwrap(), 2);

    index.delete_by_filename("a.txt").await.unwrap();
    assert_eq!(index.count(None).await.unwrap(), 1);
    index.delete_by_ids(&[3]).await.unwrap();
    assert_eq!(index.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_dimension_checked_before_sending() {
    let (addr, state) = spawn_mock().await;
    let index = client(addr, 3, None);
    index.ensure_collection().await.unwrap();

    let err = index
        .upsert(&[record(1, "a.txt", vec![1.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert!(state.lock().unwrap().points.is_empty());
}

#[tokio::test]
async fn test_server_error_is_retryable_rejection() {
    let app = Router::new().fallback(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") });
    let addr = spawn(app).await;
    let index = client(addr, 3, None);

    let err = index.count(None).await.unwrap_err();
    match &err {
        RetrievalError::Rejected { status, message } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unexpected_body_is_malformed() {
    let app = Router::new().fallback(|| async { Json(json!({ "unexpected": true })) });
    let addr = spawn(app).await;
    let index = client(addr, 3, None);

    let err = index.count(None).await.unwrap_err();
    assert!(matches!(err, RetrievalError::MalformedResponse(_)), "{}", err);
}

#[tokio::test]
async fn test_unreachable_store() {
    let index = QdrantIndex::with_api_key(
        "http://127.0.0.1:1",
        "documents",
        3,
        Duration::from_secs(2),
        None,
    )
    .unwrap();
    let err = index.count(None).await.unwrap_err();
    assert!(matches!(err, RetrievalError::ServiceUnavailable(_)), "{}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_engine_end_to_end_over_rest() {
    let (addr, _) = spawn_mock().await;
    let engine = RetrievalEngine::new(
        Arc::new(client(addr, EMBEDDING_DIMS, None)),
        Arc::new(HashingEmbedder::new()),
        ChunkParams::default(),
        RetrievalConfig::default(),
    );

    // collection is created on the first upsert
    let outcome = engine
        .index(
            "admin-config.txt",
            "The search threshold is 0.3 and chunk size is 512.",
        )
        .await;
    assert!(outcome.success, "{:?}", outcome.error);

    let resp = engine.search("search threshold", 1, 0.0).await;
    assert_eq!(resp.method, SearchMethod::Vector);
    assert_eq!(resp.results[0].filename, "admin-config.txt");

    let keyword = engine
        .search_with(
            rag_harness_core::search::SearchStrategy::Keyword,
            "threshold",
            5,
            0.0,
        )
        .await;
    assert_eq!(keyword.method, SearchMethod::KeywordFallback);
    assert_eq!(keyword.total_results, 1);

    let removed = engine.remove("admin-config.txt").await;
    assert_eq!(removed.deleted_count, 1);
    assert_eq!(engine.stats().await.record_count, 0);
}

fn foreign_and_owned_points() -> Value {
    json!([
        {
            "id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26",
            "score": 0.9,
            "payload": { "content": "written by another tool", "filename": "other.txt" }
        },
        {
            "id": 7,
            "score": 0.8,
            "payload": {
                "text": "The search threshold is 0.3",
                "filename": "admin-config.txt",
                "chunk_index": 0,
                "total_chunks": 1,
                "timestamp": "2026-01-01T00:00:00+00:00",
                "priority": true,
                "content_hash": "h1"
            }
        }
    ])
}

async fn mixed_id_op(Path((_name, op)): Path<(String, String)>) -> Response {
    match op.as_str() {
        "search" => (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response(),
        "scroll" => ok(json!({ "points": foreign_and_owned_points(), "next_page_offset": null })),
        _ => ok(json!({ "count": 2 })),
    }
}

#[tokio::test]
async fn test_points_with_uuid_ids_are_skipped() {
    let app = Router::new()
        .route("/collections/{name}", get(|| async { ok(json!({})) }))
        .route("/collections/{name}/points/{op}", post(mixed_id_op));
    let addr = spawn(app).await;
    let index = Arc::new(client(addr, EMBEDDING_DIMS, None));

    let page = index.scroll(10, None, None).await.unwrap();
    assert_eq!(page.points.len(), 1);
    assert_eq!(page.points[0].id, 7);

    let engine = RetrievalEngine::new(
        index,
        Arc::new(HashingEmbedder::new()),
        ChunkParams::default(),
        RetrievalConfig::default(),
    );

    let resp = engine.search("search threshold", 5, 0.0).await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.method, SearchMethod::KeywordFallback);
    assert_eq!(resp.total_results, 1);
    assert_eq!(resp.results[0].filename, "admin-config.txt");

    assert_eq!(engine.reconcile().await.unwrap(), 1);
    let tracked = engine.tracked_files();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].0, "admin-config.txt");
    assert_eq!(tracked[0].1.record_ids, vec![7]);
}

#[tokio::test]
async fn test_query_skips_uuid_ids() {
    let app = Router::new().route(
        "/collections/{name}/points/{op}",
        post(|| async { ok(foreign_and_owned_points()) }),
    );
    let addr = spawn(app).await;
    let index = client(addr, 3, None);

    let hits = index.query(&[1.0, 0.0, 0.0], 5, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 7);
    assert!(hits[0].payload.priority);
}

#[tokio::test]
async fn test_slow_store_times_out_as_retryable() {
    let app = Router::new()
        .route("/collections/{name}", get(|| async { ok(json!({})) }))
        .route(
            "/collections/{name}/points",
            put(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                ok(json!({}))
            }),
        )
        .route(
            "/collections/{name}/points/{op}",
            post(|| async { ok(json!({ "count": 0 })) }),
        );
    let addr = spawn(app).await;
    let index = Arc::new(
        QdrantIndex::with_api_key(
            &format!("http://{}", addr),
            "documents",
            EMBEDDING_DIMS,
            Duration::from_millis(300),
            None,
        )
        .unwrap(),
    );

    let err = index
        .upsert(&[record(1, "a.txt", vec![0.0; EMBEDDING_DIMS])])
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Timeout(_)), "{}", err);
    assert!(err.is_retryable());

    let engine = RetrievalEngine::new(
        index,
        Arc::new(HashingEmbedder::new()),
        ChunkParams::default(),
        RetrievalConfig::default(),
    );
    let outcome = engine
        .index("slow.txt", "written while the store is stalled")
        .await;
    assert!(!outcome.success);
    assert!(outcome.retryable);
    assert!(outcome.error.is_some());
}
