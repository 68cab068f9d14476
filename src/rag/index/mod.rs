//! VectorIndex trait: abstract interface over vector collections.
//!
//! Backends:
//! - `MemoryVectorIndex`: in-process, used for local runs and tests
//! - `SqliteVectorIndex`: persistent, brute-force similarity over SQLite blobs
//! - `QdrantVectorIndex`: Qdrant REST API

mod memory;
mod qdrant;
mod sqlite;

pub use memory::MemoryVectorIndex;
pub use qdrant::QdrantVectorIndex;
pub use sqlite::SqliteVectorIndex;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::IndexError;

/// Similarity metric of a collection. Scores are always higher-is-closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Dot,
    /// Scored as the negated euclidean distance.
    Euclid,
}

impl Metric {
    pub fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(query, candidate),
            Metric::Dot => dot(query, candidate),
            Metric::Euclid => -query
                .iter()
                .zip(candidate)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Scores at or below the floor are never returned as evidence.
    pub fn relevance_floor(&self) -> Option<f32> {
        match self {
            Metric::Cosine => Some(0.0),
            Metric::Dot | Metric::Euclid => None,
        }
    }

    pub fn clears_floor(&self, score: f32) -> bool {
        match self.relevance_floor() {
            Some(floor) => score > floor,
            None => !score.is_nan(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
            Metric::Euclid => "euclid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cosine" => Some(Metric::Cosine),
            "dot" => Some(Metric::Dot),
            "euclid" | "euclidean" => Some(Metric::Euclid),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a named collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dims: usize,
    pub metric: Metric,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dims: usize, metric: Metric) -> Self {
        Self {
            name: name.into(),
            dims,
            metric,
        }
    }

    /// Fails with `CollectionConflict` unless `existing` has the same shape.
    pub fn check_matches(&self, existing: &CollectionSpec) -> Result<(), IndexError> {
        if existing.dims != self.dims || existing.metric != self.metric {
            return Err(IndexError::CollectionConflict {
                name: self.name.clone(),
                existing_dims: existing.dims,
                existing_metric: existing.metric,
                requested_dims: self.dims,
                requested_metric: self.metric,
            });
        }
        Ok(())
    }

    pub fn check_dims(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Point payload: the evidence text plus free-form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub content: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Payload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn source_id(&self) -> Option<&str> {
        self.fields.get("source_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

impl IndexedPoint {
    pub fn new(id: Uuid, vector: Vec<f32>, payload: Payload) -> Self {
        Self {
            id,
            vector,
            payload,
        }
    }
}

/// A raw search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: Payload,
}

/// Abstract interface for vector collections.
///
/// Implementations must:
/// - treat `upsert` as idempotent on id, replacing vector and payload together
/// - reject vectors whose length differs from the collection's `dims`
/// - return at most `k` hits from `search`, best first, and an empty list
///   (not an error) when nothing clears the metric's relevance floor
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Create the collection if missing, otherwise verify its shape.
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<(), IndexError>;

    /// Insert or replace points by id.
    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<(), IndexError>;

    /// Top-`k` nearest points to `query`.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    /// Number of points stored in the collection.
    async fn count(&self, collection: &str) -> Result<usize, IndexError>;

    /// Release backend resources. Defaults to a no-op.
    async fn close(&self) {}
}

/// Validates a whole batch before any point is written.
pub(crate) fn check_batch_dims(
    spec: &CollectionSpec,
    points: &[IndexedPoint],
) -> Result<(), IndexError> {
    points
        .iter()
        .try_for_each(|point| spec.check_dims(&point.vector))
}

/// Scores, filters by the relevance floor, orders best-first and truncates.
pub(crate) fn rank<'a, I>(
    metric: Metric,
    query: &[f32],
    candidates: I,
    k: usize,
) -> Vec<ScoredPoint>
where
    I: IntoIterator<Item = (Uuid, &'a [f32], &'a Payload)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredPoint> = candidates
        .into_iter()
        .filter_map(|(id, vector, payload)| {
            let score = metric.score(query, vector);
            metric.clears_floor(score).then(|| ScoredPoint {
                id,
                score,
                payload: payload.clone(),
            })
        })
        .collect();

    sort_best_first(&mut scored);
    scored.truncate(k);
    scored
}

/// Orders by non-increasing score; ties fall back to id order.
pub(crate) fn sort_best_first(points: &mut [ScoredPoint]) {
    points.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    let denom = norm_a * norm_b;
    if denom <= f32::EPSILON {
        return 0.0;
    }

    (dot(a, b) / denom).clamp(-1.0, 1.0)
}
