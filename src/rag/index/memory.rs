//! In-process vector index.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    check_batch_dims, rank, CollectionSpec, IndexedPoint, Payload, ScoredPoint, VectorIndex,
};
use crate::rag::error::IndexError;

struct StoredPoint {
    vector: Vec<f32>,
    payload: Payload,
}

struct Collection {
    spec: CollectionSpec,
    points: HashMap<Uuid, StoredPoint>,
}

/// Collections held in memory behind a read-write lock.
///
/// Upserts take the write lock for the whole batch, so a concurrent search
/// sees either none or all of a batch.
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<(), IndexError> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(&spec.name) {
            return spec.check_matches(&existing.spec);
        }
        collections.insert(
            spec.name.clone(),
            Collection {
                spec: spec.clone(),
                points: HashMap::new(),
            },
        );
        tracing::info!(
            "Created in-memory collection '{}' (dims={}, metric={})",
            spec.name,
            spec.dims,
            spec.metric
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<(), IndexError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))?;

        check_batch_dims(&target.spec, &points)?;

        for point in points {
            target.points.insert(
                point.id,
                StoredPoint {
                    vector: point.vector,
                    payload: point.payload,
                },
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))?;

        target.spec.check_dims(query)?;

        let candidates = target
            .points
            .iter()
            .map(|(id, point)| (*id, point.vector.as_slice(), &point.payload));
        Ok(rank(target.spec.metric, query, candidates, k))
    }

    async fn count(&self, collection: &str) -> Result<usize, IndexError> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.points.len())
            .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))
    }
}
