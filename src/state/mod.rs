use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatService, Dispatcher};
use crate::core::config::{AppPaths, ConfigService, IndexBackend, IndexSettings, Settings};
use crate::history::HistoryStore;
use crate::ingest::Ingestor;
use crate::llm::{build_embedder, build_language_model, Embedder, LanguageModel};
use crate::rag::{
    AnswerSynthesizer, CollectionSpec, ContextAssembler, IndexError, MemoryVectorIndex,
    QdrantVectorIndex, RagPipeline, Retriever, SqliteVectorIndex, VectorIndex,
};

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
///
/// Built once at startup and torn down by [`AppState::shutdown`] after the
/// server stops accepting connections.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<Settings>,
    pub history: HistoryStore,
    pub index: Arc<dyn VectorIndex>,
    pub pipeline: Arc<RagPipeline>,
    pub ingestor: Arc<Ingestor>,
    pub dispatcher: Dispatcher,
    /// Shared client for pushing webhook replies.
    pub reply_client: reqwest::Client,
}

impl AppState {
    /// Opens the stores and providers named by `settings` and starts the dispatcher.
    pub async fn initialize(
        config: ConfigService,
        settings: Settings,
    ) -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(config.paths().clone());

        let history = HistoryStore::open(&paths.db_path)
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let index = open_index(&settings.index, &paths)
            .await
            .map_err(|e| InitializationError::Index(e.into()))?;
        let spec = CollectionSpec::new(
            settings.index.collection.clone(),
            settings.index.dims,
            settings.index.metric,
        );
        prepare_collection(index.as_ref(), &spec).await?;

        let embedder = build_embedder(&settings.embedder)
            .map_err(|e| InitializationError::Embedder(e.into()))?;
        let model = build_language_model(&settings.llm)
            .map_err(|e| InitializationError::Llm(e.into()))?;

        let pipeline = Arc::new(build_pipeline(&settings, embedder.clone(), index.clone(), model));

        let ingestor = Arc::new(
            Ingestor::new(
                embedder,
                index.clone(),
                spec,
                settings.chunking.chunking_config(),
                settings.chunking.embed_batch_size,
            )
            .map_err(|e| InitializationError::Ingest(e.into()))?,
        );

        let service = Arc::new(ChatService::new(pipeline.clone(), history.clone()));
        let dispatcher = Dispatcher::from_settings(service, &settings.dispatch);

        tracing::info!(
            "Initialized: index={} collection='{}' embedder={} llm={}",
            index.name(),
            settings.index.collection,
            settings.embedder.model,
            settings.llm.model
        );

        Ok(Arc::new(AppState {
            paths,
            config,
            settings: Arc::new(settings),
            history,
            index,
            pipeline,
            ingestor,
            dispatcher,
            reply_client: reqwest::Client::new(),
        }))
    }

    /// Drains in-flight chat work, then closes the stores.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.settings.dispatch.shutdown_grace_secs);
        self.dispatcher.shutdown(grace).await;
        self.index.close().await;
        self.history.close().await;
        tracing::info!("Application state shut down");
    }
}

pub fn build_pipeline(
    settings: &Settings,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
) -> RagPipeline {
    let retriever = Retriever::new(
        embedder,
        index,
        settings.index.collection.clone(),
        Duration::from_secs(settings.retrieval.embed_timeout_secs),
    );
    let synthesizer = AnswerSynthesizer::new(
        model,
        settings.messages.unusable_answer.clone(),
        settings.messages.apology.clone(),
    );
    RagPipeline::new(
        retriever,
        ContextAssembler::new(settings.conversation.history_limit),
        synthesizer,
        settings.retrieval.top_k,
        &settings.messages,
    )
    .with_query_prefix(settings.retrieval.query_prefix.clone())
}

pub async fn open_index(
    settings: &IndexSettings,
    paths: &AppPaths,
) -> Result<Arc<dyn VectorIndex>, IndexError> {
    Ok(match settings.backend {
        IndexBackend::Memory => Arc::new(MemoryVectorIndex::new()),
        IndexBackend::Sqlite => Arc::new(SqliteVectorIndex::open(&paths.index_db_path).await?),
        IndexBackend::Qdrant => Arc::new(QdrantVectorIndex::new(
            &settings.qdrant_url,
            settings.qdrant_api_key.as_deref(),
            Duration::from_secs(settings.timeout_secs),
        )?),
    })
}

/// A conflicting collection is fatal; an unreachable backend is not, since
/// query-time failures already degrade to an apology.
async fn prepare_collection(
    index: &dyn VectorIndex,
    spec: &CollectionSpec,
) -> Result<(), InitializationError> {
    match index.ensure_collection(spec).await {
        Ok(()) => Ok(()),
        Err(e @ IndexError::CollectionConflict { .. }) => Err(InitializationError::Index(e.into())),
        Err(e) => {
            tracing::warn!("Collection '{}' not ready at startup: {}", spec.name, e);
            Ok(())
        }
    }
}
