//! Error taxonomy of the retrieval/synthesis core.

use std::time::Duration;

use thiserror::Error;

use crate::llm::ProviderError;

use super::index::Metric;

/// Invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_length must be greater than zero")]
    ZeroMaxLength,
    #[error("overlap ({overlap}) must be smaller than max_length ({max_length})")]
    OverlapTooLarge { overlap: usize, max_length: usize },
}

/// Vector index failures.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(
        "collection '{name}' already exists with dims={existing_dims}, metric={existing_metric} \
         (requested dims={requested_dims}, metric={requested_metric})"
    )]
    CollectionConflict {
        name: String,
        existing_dims: usize,
        existing_metric: Metric,
        requested_dims: usize,
        requested_metric: Metric,
    },
    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),
    #[error("vector index backend error: {0}")]
    Backend(String),
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        IndexError::Backend(err.to_string())
    }
}

/// Query-time retrieval failures. Never swallowed into partial results.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding provider failed: {0}")]
    Embedder(#[source] ProviderError),
    #[error("embedding provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("vector index failed: {0}")]
    Index(#[source] IndexError),
}

/// Language-model failures. Only ever observed inside the synthesizer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("language model call failed: {0}")]
    Provider(#[source] ProviderError),
    #[error("language model returned no usable text")]
    Unusable,
}
