pub mod paths;
pub mod service;
pub mod settings;
pub mod validation;

pub use paths::AppPaths;
pub use service::ConfigService;
pub use settings::{
    ChunkingSettings, ConversationSettings, DispatchSettings, EmbedderSettings, IndexBackend,
    IndexSettings, LlmSettings, MessageSettings, ProviderKind, RetrievalSettings, ServerSettings,
    Settings, TransportSettings,
};
pub use validation::SettingsError;
