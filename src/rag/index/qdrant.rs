//! Qdrant REST vector index.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    sort_best_first, CollectionSpec, IndexedPoint, Metric, Payload, ScoredPoint, VectorIndex,
};
use crate::rag::error::IndexError;

/// Client for a Qdrant server.
///
/// Collection shapes are cached after `ensure_collection` (or the first
/// lookup) so dimensionality is validated before any request leaves the
/// process.
pub struct QdrantVectorIndex {
    client: Client,
    base_url: String,
    specs: RwLock<HashMap<String, CollectionSpec>>,
}

impl QdrantVectorIndex {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(IndexError::Backend(
                "Qdrant URL must be an http(s) URL".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            headers.insert(
                "api-key",
                HeaderValue::from_str(key)
                    .map_err(|_| IndexError::Backend("invalid Qdrant API key".to_string()))?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(IndexError::backend)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            specs: RwLock::new(HashMap::new()),
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    async fn fetch_spec(&self, name: &str) -> Result<Option<CollectionSpec>, IndexError> {
        let res = self
            .client
            .get(self.collection_url(name))
            .send()
            .await
            .map_err(IndexError::backend)?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let info: QdrantResponse<CollectionInfo> = parse_response(res).await?;
        let vectors = info.result.config.params.vectors;
        let metric = distance_to_metric(&vectors.distance).ok_or_else(|| {
            IndexError::Backend(format!("unsupported Qdrant distance '{}'", vectors.distance))
        })?;
        Ok(Some(CollectionSpec::new(name, vectors.size, metric)))
    }

    async fn spec_for(&self, name: &str) -> Result<CollectionSpec, IndexError> {
        if let Some(spec) = self.specs.read().await.get(name) {
            return Ok(spec.clone());
        }
        let spec = self
            .fetch_spec(name)
            .await?
            .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))?;
        self.specs
            .write()
            .await
            .insert(name.to_string(), spec.clone());
        Ok(spec)
    }

    async fn create(&self, spec: &CollectionSpec) -> Result<(), IndexError> {
        let body = json!({
            "vectors": {
                "size": spec.dims,
                "distance": metric_to_distance(spec.metric),
            }
        });
        let res = self
            .client
            .put(self.collection_url(&spec.name))
            .json(&body)
            .send()
            .await
            .map_err(IndexError::backend)?;

        // Another writer may have created it between our lookup and this call.
        if res.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        let _: QdrantResponse<Value> = parse_response(res).await?;
        tracing::info!(
            "Created Qdrant collection '{}' (dims={}, metric={})",
            spec.name,
            spec.dims,
            spec.metric
        );
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<(), IndexError> {
        let existing = match self.fetch_spec(&spec.name).await? {
            Some(existing) => existing,
            None => {
                self.create(spec).await?;
                self.fetch_spec(&spec.name)
                    .await?
                    .unwrap_or_else(|| spec.clone())
            }
        };
        spec.check_matches(&existing)?;
        self.specs
            .write()
            .await
            .insert(spec.name.clone(), existing);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<(), IndexError> {
        let spec = self.spec_for(collection).await?;
        super::check_batch_dims(&spec, &points)?;
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
                .collect::<Vec<_>>(),
        });
        let res = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(collection)))
            .json(&body)
            .send()
            .await
            .map_err(IndexError::backend)?;
        if res.status() == StatusCode::NOT_FOUND {
            self.specs.write().await.remove(collection);
            return Err(IndexError::CollectionNotFound(collection.to_string()));
        }
        let _: QdrantResponse<Value> = parse_response(res).await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let spec = self.spec_for(collection).await?;
        spec.check_dims(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let body = json!({
            "vector": query,
            "limit": k,
            "with_payload": true,
        });
        let res = self
            .client
            .post(format!("{}/points/search", self.collection_url(collection)))
            .json(&body)
            .send()
            .await
            .map_err(IndexError::backend)?;
        if res.status() == StatusCode::NOT_FOUND {
            self.specs.write().await.remove(collection);
            return Err(IndexError::CollectionNotFound(collection.to_string()));
        }
        let response: QdrantResponse<Vec<SearchHit>> = parse_response(res).await?;

        let mut hits = Vec::with_capacity(response.result.len());
        for hit in response.result {
            let Some(payload) = hit.payload else {
                tracing::warn!("Qdrant hit without payload in '{}' skipped", collection);
                continue;
            };
            let payload: Payload = match serde_json::from_value(payload) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Qdrant hit without usable content in '{}': {}", collection, e);
                    continue;
                }
            };
            // Qdrant reports euclidean distance; flip it to higher-is-closer.
            let score = match spec.metric {
                Metric::Euclid => -hit.score,
                Metric::Cosine | Metric::Dot => hit.score,
            };
            if !spec.metric.clears_floor(score) {
                continue;
            }
            hits.push(ScoredPoint {
                id: parse_point_id(&hit.id)?,
                score,
                payload,
            });
        }

        sort_best_first(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize, IndexError> {
        let res = self
            .client
            .post(format!("{}/points/count", self.collection_url(collection)))
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(IndexError::backend)?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::CollectionNotFound(collection.to_string()));
        }
        let response: QdrantResponse<CountResult> = parse_response(res).await?;
        Ok(response.result.count)
    }
}

async fn parse_response<T: for<'de> Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<QdrantResponse<T>, IndexError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(IndexError::Backend(format!(
            "Qdrant request failed ({}): {}",
            status, body
        )));
    }
    res.json().await.map_err(IndexError::backend)
}

fn metric_to_distance(metric: Metric) -> &'static str {
    match metric {
        Metric::Cosine => "Cosine",
        Metric::Dot => "Dot",
        Metric::Euclid => "Euclid",
    }
}

fn distance_to_metric(distance: &str) -> Option<Metric> {
    Metric::parse(distance)
}

/// Qdrant ids are UUIDs or unsigned integers; integers map onto the low bits.
fn parse_point_id(id: &Value) -> Result<Uuid, IndexError> {
    match id {
        Value::String(s) => Uuid::parse_str(s).map_err(IndexError::backend),
        Value::Number(n) => n
            .as_u64()
            .map(|n| Uuid::from_u128(n as u128))
            .ok_or_else(|| IndexError::Backend(format!("unsupported point id {}", n))),
        other => Err(IndexError::Backend(format!("unsupported point id {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collection_body(size: usize, distance: &str) -> Value {
        json!({
            "status": "ok",
            "result": {
                "status": "green",
                "config": { "params": { "vectors": { "size": size, "distance": distance } } }
            }
        })
    }

    fn index_for(server: &MockServer) -> QdrantVectorIndex {
        QdrantVectorIndex::new(&server.uri(), Some("test-key"), Duration::from_secs(5))
            .expect("client")
    }

    #[tokio::test]
    async fn ensure_collection_creates_missing_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/text_embeddings"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/text_embeddings"))
            .and(body_partial_json(json!({ "vectors": { "size": 1024, "distance": "Cosine" } })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "ok", "result": true })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/collections/text_embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(1024, "Cosine")))
            .mount(&server)
            .await;

        let index = index_for(&server);
        index
            .ensure_collection(&CollectionSpec::new("text_embeddings", 1024, Metric::Cosine))
            .await
            .expect("ensure");
    }

    #[tokio::test]
    async fn ensure_collection_reports_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/text_embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(768, "Cosine")))
            .mount(&server)
            .await;

        let index = index_for(&server);
        let err = index
            .ensure_collection(&CollectionSpec::new("text_embeddings", 1024, Metric::Cosine))
            .await
            .expect_err("dims differ");
        assert!(matches!(err, IndexError::CollectionConflict { existing_dims: 768, .. }));
    }

    #[tokio::test]
    async fn upsert_validates_dims_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(4, "Cosine")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let index = index_for(&server);
        let point = IndexedPoint::new(Uuid::from_u128(1), vec![1.0, 2.0], Payload::new("x"));
        let err = index.upsert("docs", vec![point]).await.expect_err("2 != 4");
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn upsert_sends_points_and_waits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(2, "Cosine")))
            .mount(&server)
            .await;
        let id = Uuid::from_u128(42);
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .and(query_param("wait", "true"))
            .and(body_partial_json(json!({
                "points": [{ "id": id.to_string(), "payload": { "content": "hello" } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "result": { "operation_id": 1, "status": "completed" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let index = index_for(&server);
        index
            .upsert("docs", vec![IndexedPoint::new(id, vec![0.1, 0.2], Payload::new("hello"))])
            .await
            .expect("upsert");
    }

    #[tokio::test]
    async fn search_parses_hits_and_applies_floor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection_body(2, "Cosine")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/search"))
            .and(body_partial_json(json!({ "limit": 3, "with_payload": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "result": [
                    {
                        "id": 7,
                        "score": 0.91,
                        "payload": { "content": "best", "source_id": "a.pdf" }
                    },
                    {
                        "id": "00000000-0000-0000-0000-000000000002",
                        "score": 0.40,
                        "payload": { "content": "second" }
                    },
                    { "id": 9, "score": -0.2, "payload": { "content": "opposite" } }
                ]
            })))
            .mount(&server)
            .await;

        let index = index_for(&server);
        let hits = index.search("docs", &[1.0, 0.0], 3).await.expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, Uuid::from_u128(7));
        assert_eq!(hits[0].payload.source_id(), Some("a.pdf"));
        assert_eq!(hits[1].payload.content, "second");
    }

    #[tokio::test]
    async fn missing_collection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let index = index_for(&server);
        assert!(matches!(
            index.search("ghost", &[1.0], 1).await,
            Err(IndexError::CollectionNotFound(_))
        ));
    }
}
