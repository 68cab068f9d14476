//! Typed view over the merged YAML configuration.
//!
//! Every section and field has a default so an empty `config.yml` yields a
//! working local setup (Ollama embeddings + chat, in-memory index).

use serde::{Deserialize, Serialize};

use crate::rag::{ChunkingConfig, Metric};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub chunking: ChunkingSettings,
    pub index: IndexSettings,
    pub embedder: EmbedderSettings,
    pub llm: LlmSettings,
    pub retrieval: RetrievalSettings,
    pub conversation: ConversationSettings,
    pub dispatch: DispatchSettings,
    pub transport: TransportSettings,
    pub messages: MessageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_length: usize,
    pub overlap: usize,
    /// Number of chunks sent to the embedder per request during ingestion.
    pub embed_batch_size: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_length: 512,
            overlap: 100,
            embed_batch_size: 16,
        }
    }
}

impl ChunkingSettings {
    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_length: self.max_length,
            overlap: self.overlap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Memory,
    Sqlite,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: IndexBackend,
    pub collection: String,
    pub dims: usize,
    pub metric: Metric,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            collection: "text_embeddings".to_string(),
            dims: 1024,
            metric: Metric::Cosine,
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    #[serde(alias = "openai", alias = "lmstudio")]
    OpenaiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderSettings {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "bge-m3:latest".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "gemma2:9b".to_string(),
            api_key: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Upper bound for the query embedding call.
    pub embed_timeout_secs: u64,
    /// Prepended to every question before retrieval and synthesis.
    pub query_prefix: Option<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            embed_timeout_secs: 15,
            query_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    pub history_limit: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self { history_limit: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Identities processed at the same time.
    pub max_concurrent: usize,
    /// Pending messages buffered per identity.
    pub queue_capacity: usize,
    /// Seconds an identity worker waits for new work before retiring.
    pub idle_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_capacity: 16,
            idle_timeout_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Outbound endpoint that receives webhook replies.
    pub reply_url: Option<String>,
    pub reply_access_token: Option<String>,
    /// How long a webhook reply token stays valid.
    pub reply_ttl_secs: u64,
    /// How long `POST /api/chat` waits for an answer.
    pub chat_timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            reply_url: None,
            reply_access_token: None,
            reply_ttl_secs: 55,
            chat_timeout_secs: 180,
        }
    }
}

/// User-facing texts for the degraded outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    pub no_evidence: String,
    pub unusable_answer: String,
    pub apology: String,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            no_evidence: "No relevant information was found in the knowledge base.".to_string(),
            unusable_answer: "Unable to build an answer from the available information."
                .to_string(),
            apology: "Sorry, an error occurred while generating the answer.".to_string(),
        }
    }
}
