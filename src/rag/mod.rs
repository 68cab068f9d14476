//! Retrieval-augmented generation core.
//!
//! - `chunker`: splits text into overlapping windows
//! - `index`: vector collections (memory, SQLite, Qdrant)
//! - `retriever`: query text to ranked evidence
//! - `context_builder`: evidence plus bounded history into a synthesis input
//! - `synthesizer`: language-model call with fail-open normalization
//! - `pipeline`: the three stages wired for one question

pub mod chunker;
pub mod context_builder;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod retriever;
pub mod synthesizer;

pub use chunker::{chunk, Chunk, ChunkingConfig};
pub use context_builder::{AssembledContext, ContextAssembler, SynthesisInput};
pub use error::{ConfigError, IndexError, RetrievalError, SynthesisError};
pub use index::{
    CollectionSpec, IndexedPoint, MemoryVectorIndex, Metric, Payload, QdrantVectorIndex,
    ScoredPoint, SqliteVectorIndex, VectorIndex,
};
pub use pipeline::{Answer, AnswerOutcome, RagPipeline};
pub use retriever::{RetrievalResult, Retriever};
pub use synthesizer::{AnswerSynthesizer, Synthesis, SynthesisKind};
