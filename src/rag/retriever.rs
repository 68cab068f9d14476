//! Query-time retrieval: embed the question, search the collection.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::RetrievalError;
use super::index::VectorIndex;
use crate::llm::Embedder;

/// One piece of evidence. `score` is higher-is-more-similar for every metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl RetrievalResult {
    pub fn new(content: impl Into<String>, score: f32, source_id: Option<String>) -> Self {
        Self {
            content: content.into(),
            score,
            source_id,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    embed_timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            embed_timeout,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Top-`k` evidence for `query`, best first. No hits is `Ok(vec![])`.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let vector = tokio::time::timeout(self.embed_timeout, self.embedder.embed_one(query))
            .await
            .map_err(|_| RetrievalError::Timeout(self.embed_timeout))?
            .map_err(RetrievalError::Embedder)?;

        let hits = self
            .index
            .search(&self.collection, &vector, k)
            .await
            .map_err(RetrievalError::Index)?;

        tracing::debug!(
            "Retrieved {} hit(s) from '{}' via {}",
            hits.len(),
            self.collection,
            self.index.name()
        );

        Ok(hits
            .into_iter()
            .map(|hit| {
                let source_id = hit.payload.source_id().map(str::to_string);
                RetrievalResult::new(hit.payload.content, hit.score, source_id)
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::llm::{Embedder, ProviderError};

    /// Maps a text onto a fixed vector by keyword, so tests control similarity.
    pub struct KeywordEmbedder {
        pub dims: usize,
        pub keywords: Vec<(&'static str, usize)>,
        pub calls: AtomicUsize,
    }

    impl KeywordEmbedder {
        pub fn new(dims: usize, keywords: Vec<(&'static str, usize)>) -> Self {
            Self {
                dims,
                keywords,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut vector = vec![0.0; self.dims];
            for (keyword, axis) in &self.keywords {
                if text.contains(keyword) {
                    vector[*axis] += 1.0;
                }
            }
            // Unmatched text points along the last axis.
            if vector.iter().all(|v| *v == 0.0) {
                vector[self.dims - 1] = 1.0;
            }
            vector
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn name(&self) -> &str {
            "keyword"
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.iter().map(|text| self.vector_for(text)).collect())
        }
    }

    pub struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Unreachable("connection refused".to_string()))
        }
    }

    pub struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            std::future::pending().await
        }
    }
}
