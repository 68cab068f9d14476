//! Batch ingestion: chunk, embed, upsert.

mod export;

pub use export::{csv_field, export_csv, write_csv};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::llm::{Embedder, ProviderError};
use crate::rag::{
    chunk, Chunk, ChunkingConfig, CollectionSpec, ConfigError, IndexError, IndexedPoint, Payload,
    VectorIndex,
};

/// Namespace for chunk point ids; `"{source_id}#{index}"` is hashed into it.
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f0b_6c1e_3f2a_5d8e_9a41_27c3_b5e0_d914);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid chunking configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),
    #[error("index write failed: {0}")]
    Index(#[from] IndexError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub sources: usize,
    pub chunks: usize,
    pub batches: usize,
}

/// Deterministic id of a chunk: re-ingesting a source overwrites its points.
pub fn point_id(source_id: &str, index: usize) -> Uuid {
    Uuid::new_v5(&POINT_NAMESPACE, format!("{}#{}", source_id, index).as_bytes())
}

pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    spec: CollectionSpec,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        spec: CollectionSpec,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Result<Self, IngestError> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            index,
            spec,
            chunking,
            batch_size: batch_size.max(1),
        })
    }

    pub fn chunking(&self) -> ChunkingConfig {
        self.chunking
    }

    pub fn chunk_source(&self, source_id: &str, text: &str) -> Result<Vec<Chunk>, IngestError> {
        Ok(chunk(source_id, text, self.chunking)?)
    }

    pub async fn ingest_text(
        &self,
        source_id: &str,
        text: &str,
    ) -> Result<IngestReport, IngestError> {
        self.ingest_sources(&[(source_id.to_string(), text.to_string())])
            .await
    }

    /// Chunks every `(source_id, text)` pair and indexes the result.
    pub async fn ingest_sources(
        &self,
        sources: &[(String, String)],
    ) -> Result<IngestReport, IngestError> {
        let mut chunks = Vec::new();
        for (source_id, text) in sources {
            chunks.extend(self.chunk_source(source_id, text)?);
        }
        let mut report = self.ingest_chunks(&chunks).await?;
        report.sources = sources.len();
        Ok(report)
    }

    /// Embeds and upserts pre-built chunks, one batch at a time. Aborts on the
    /// first failing batch; batches already written stay.
    pub async fn ingest_chunks(&self, chunks: &[Chunk]) -> Result<IngestReport, IngestError> {
        self.index.ensure_collection(&self.spec).await?;

        let mut report = IngestReport {
            collection: self.spec.name.clone(),
            ..IngestReport::default()
        };

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(IngestError::Embedding(ProviderError::Decode(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                ))));
            }

            let points = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| {
                    IndexedPoint::new(
                        point_id(&chunk.source_id, chunk.index),
                        vector,
                        payload_for(chunk),
                    )
                })
                .collect();
            self.index.upsert(&self.spec.name, points).await?;

            report.batches += 1;
            report.chunks += batch.len();
            tracing::debug!(
                "Upserted batch {} ({} chunks) into '{}'",
                report.batches,
                batch.len(),
                self.spec.name
            );
        }

        tracing::info!(
            "Ingested {} chunk(s) into '{}' in {} batch(es)",
            report.chunks,
            report.collection,
            report.batches
        );
        Ok(report)
    }
}

fn payload_for(chunk: &Chunk) -> Payload {
    Payload::new(chunk.text.clone())
        .with_field("source_id", chunk.source_id.clone())
        .with_field("chunk_index", chunk.index)
        .with_field("start_offset", chunk.start_offset)
        .with_field("end_offset", chunk.end_offset)
}

/// Reads every `*.txt` / `*.md` file of `dir` as `(file name, contents)`,
/// sorted by name.
pub fn load_text_sources(dir: &Path) -> Result<Vec<(String, String)>, IngestError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
            .unwrap_or(false);
        if path.is_file() && is_text {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let text = std::fs::read_to_string(&path).map_err(io_err(&path))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok((name, text))
        })
        .collect()
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> IngestError {
    let path = path.to_path_buf();
    move |source| IngestError::Io { path, source }
}
