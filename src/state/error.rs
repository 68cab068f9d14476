use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to initialize history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to initialize vector index: {0}")]
    Index(#[source] anyhow::Error),

    #[error("Failed to initialize embedding provider: {0}")]
    Embedder(#[source] anyhow::Error),

    #[error("Failed to initialize language model: {0}")]
    Llm(#[source] anyhow::Error),

    #[error("Failed to initialize ingestion: {0}")]
    Ingest(#[source] anyhow::Error),
}
