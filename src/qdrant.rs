//! Qdrant REST implementation of [`VectorIndex`].
//!
//! Talks JSON over HTTP to a Qdrant instance. Every call is bounded by the
//! client timeout from `[index].timeout_secs`; upserts and deletes pass
//! `wait=true` so that success means the store has applied the write.
//!
//! # Error mapping
//!
//! | Condition | Error |
//! |-----------|-------|
//! | connect failure | `ServiceUnavailable` |
//! | client timeout | `Timeout` |
//! | HTTP 404 | `CollectionMissing` |
//! | other non-2xx | `Rejected { status, message }` |
//! | unexpected body | `MalformedResponse` |
//!
//! Points this index did not write (UUID ids, foreign payloads) are skipped
//! with a warning rather than failing the whole response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use rag_harness_core::error::{Result, RetrievalError};
use rag_harness_core::models::{
    RecordPayload, ScoredPoint, ScrollPage, StoredPoint, VectorRecord,
};
use rag_harness_core::store::VectorIndex;

use crate::config::IndexConfig;

/// Async Qdrant client bound to a single collection.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    dims: usize,
}

impl QdrantIndex {
    /// Build a client from configuration.
    ///
    /// The API key, when the configured environment variable is set, is
    /// sent as the `api-key` header on every request.
    pub fn new(config: &IndexConfig, dims: usize) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::with_api_key(
            &config.url,
            &config.collection,
            dims,
            Duration::from_secs(config.timeout_secs),
            api_key.as_deref(),
        )
    }

    pub fn with_api_key(
        url: &str,
        collection: &str,
        dims: usize,
        timeout: Duration,
        api_key: Option<&str>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            url.starts_with("http://") || url.starts_with("https://"),
            "Qdrant url must be an http(s) URL"
        );
        anyhow::ensure!(!collection.trim().is_empty(), "missing collection name");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            headers.insert("api-key", HeaderValue::from_str(key)?);
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            dims,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn points_url(&self, op: &str) -> String {
        format!("{}/points{}", self.collection_url(), op)
    }

    /// Send a request and decode the `result` field of a 2xx response.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<T> {
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = &body {
            request = request.json(body);
        }
        debug!(%method, %url, "qdrant request");

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RetrievalError::CollectionMissing(self.collection.clone()));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RetrievalError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Timeout(e.to_string())
            } else {
                RetrievalError::MalformedResponse(e.to_string())
            }
        })?;
        Ok(envelope.result)
    }
}

fn map_transport_error(e: reqwest::Error) -> RetrievalError {
    if e.is_timeout() {
        RetrievalError::Timeout(e.to_string())
    } else {
        RetrievalError::ServiceUnavailable(e.to_string())
    }
}

fn filename_filter(filename: &str) -> Value {
    json!({ "must": [ { "key": "filename", "match": { "value": filename } } ] })
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Serialize)]
struct PointStruct<'a> {
    id: u64,
    vector: &'a [f32],
    payload: &'a RecordPayload,
}

#[derive(Deserialize)]
struct ScoredPointDto {
    id: Value,
    score: f32,
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct RecordDto {
    id: Value,
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct ScrollResultDto {
    points: Vec<RecordDto>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct CountResultDto {
    count: u64,
}

/// Qdrant ids are unsigned integers or UUID strings; this index only
/// writes integers.
fn point_id(id: &Value) -> Result<u64> {
    id.as_u64()
        .ok_or_else(|| RetrievalError::MalformedResponse(format!("unsupported point id: {}", id)))
}

/// Id and payload of a returned point, or `None` for points this index
/// cannot have written. Those are logged and skipped.
fn usable_point(id: &Value, payload: Option<Value>) -> Option<(u64, RecordPayload)> {
    let id = match point_id(id) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "skipping foreign point");
            return None;
        }
    };
    let Some(payload) = payload else {
        warn!(id, "skipping point without payload");
        return None;
    };
    match serde_json::from_value::<RecordPayload>(payload) {
        Ok(payload) => Some((id, payload)),
        Err(e) => {
            warn!(id, error = %e, "skipping point with unreadable payload");
            None
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn collection_exists(&self) -> Result<bool> {
        match self
            .call::<Value>(Method::GET, self.collection_url(), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(RetrievalError::CollectionMissing(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_collection(&self) -> Result<()> {
        let body = json!({ "vectors": { "size": self.dims, "distance": "Cosine" } });
        self.call::<Value>(Method::PUT, self.collection_url(), Some(body))
            .await?;
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dims) {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dims,
                actual: bad.vector.len(),
            });
        }
        let points: Vec<PointStruct<'_>> = records
            .iter()
            .map(|r| PointStruct {
                id: r.id,
                vector: &r.vector,
                payload: &r.payload,
            })
            .collect();
        let body = json!({ "points": points });
        self.call::<Value>(Method::PUT, self.points_url("?wait=true"), Some(body))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": top_n,
            "with_payload": true,
        });
        if let Some(min) = min_score {
            body["score_threshold"] = json!(min);
        }
        let hits: Vec<ScoredPointDto> = self
            .call(Method::POST, self.points_url("/search"), Some(body))
            .await?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let (id, payload) = usable_point(&hit.id, hit.payload)?;
                Some(ScoredPoint {
                    id,
                    score: hit.score,
                    payload,
                })
            })
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids });
        self.call::<Value>(Method::POST, self.points_url("/delete?wait=true"), Some(body))
            .await?;
        Ok(())
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<()> {
        let body = json!({ "filter": filename_filter(filename) });
        self.call::<Value>(Method::POST, self.points_url("/delete?wait=true"), Some(body))
            .await?;
        Ok(())
    }

    async fn scroll(
        &self,
        limit: usize,
        offset: Option<u64>,
        filename: Option<&str>,
    ) -> Result<ScrollPage> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        if let Some(f) = filename {
            body["filter"] = filename_filter(f);
        }
        let page: ScrollResultDto = self
            .call(Method::POST, self.points_url("/scroll"), Some(body))
            .await?;

        let points = page
            .points
            .into_iter()
            .filter_map(|p| {
                let (id, payload) = usable_point(&p.id, p.payload)?;
                Some(StoredPoint { id, payload })
            })
            .collect();
        // Qdrant orders integer ids before UUIDs, so a UUID offset means
        // nothing this index wrote remains.
        let next_offset = match page.next_page_offset {
            None | Some(Value::Null) => None,
            Some(v) => match point_id(&v) {
                Ok(next) => Some(next),
                Err(e) => {
                    warn!(error = %e, "stopping scroll at foreign point");
                    None
                }
            },
        };
        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    async fn count(&self, filename: Option<&str>) -> Result<u64> {
        let mut body = json!({ "exact": true });
        if let Some(f) = filename {
            body["filter"] = filename_filter(f);
        }
        let result: CountResultDto = self
            .call(Method::POST, self.points_url("/count"), Some(body))
            .await?;
        Ok(result.count)
    }
}
