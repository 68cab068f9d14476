use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ragbot_backend::core::config::{AppPaths, ConfigService};
use ragbot_backend::core::logging;
use ragbot_backend::ingest::{export_csv, load_text_sources, Ingestor};
use ragbot_backend::llm::build_embedder;
use ragbot_backend::rag::CollectionSpec;
use ragbot_backend::state::open_index;

#[derive(Parser, Debug)]
#[command(
    name = "ragbot-ingest",
    about = "Chunk, embed and index a directory of text documents"
)]
struct IngestCli {
    /// Directory holding the `.txt` / `.md` sources
    #[arg(long, env = "RAGBOT_INGEST_INPUT")]
    input_dir: PathBuf,

    /// Also write the chunks as `filename,chunk_id,text` CSV
    #[arg(long, env = "RAGBOT_INGEST_CSV")]
    csv: Option<PathBuf>,

    /// Chunk (and export) only; skip embedding and indexing
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Target collection, overriding `index.collection`
    #[arg(long, env = "RAGBOT_INGEST_COLLECTION")]
    collection: Option<String>,

    /// Window size in characters, overriding `chunking.max_length`
    #[arg(long)]
    max_length: Option<usize>,

    /// Window overlap in characters, overriding `chunking.overlap`
    #[arg(long)]
    overlap: Option<usize>,

    /// Chunks per embedding request, overriding `chunking.embed_batch_size`
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = IngestCli::parse();

    let paths = Arc::new(AppPaths::new());
    logging::init(&paths, "ragbot-ingest.log");
    let config = ConfigService::new(paths.clone());
    let mut settings = config.load_settings().context("Failed to load settings")?;

    if let Some(collection) = cli.collection {
        settings.index.collection = collection;
    }
    if let Some(max_length) = cli.max_length {
        settings.chunking.max_length = max_length;
    }
    if let Some(overlap) = cli.overlap {
        settings.chunking.overlap = overlap;
    }
    if let Some(batch_size) = cli.batch_size {
        settings.chunking.embed_batch_size = batch_size;
    }

    let sources = load_text_sources(&cli.input_dir)
        .with_context(|| format!("Failed to read {}", cli.input_dir.display()))?;
    tracing::info!(
        "Loaded {} source(s) from {}",
        sources.len(),
        cli.input_dir.display()
    );

    let chunking = settings.chunking.chunking_config();
    chunking.validate().context("Invalid chunking settings")?;
    let mut chunks = Vec::new();
    for (source_id, text) in &sources {
        chunks.extend(ragbot_backend::rag::chunk(source_id, text, chunking)?);
    }
    tracing::info!("Produced {} chunk(s)", chunks.len());

    if let Some(csv_path) = &cli.csv {
        export_csv(csv_path, &chunks)
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;
        tracing::info!("Wrote chunks to {}", csv_path.display());
    }

    if cli.dry_run {
        println!(
            "{} source(s), {} chunk(s); dry run, nothing indexed",
            sources.len(),
            chunks.len()
        );
        return Ok(());
    }

    let index = open_index(&settings.index, &paths)
        .await
        .context("Failed to open vector index")?;
    let embedder = build_embedder(&settings.embedder).context("Failed to build embedder")?;
    let spec = CollectionSpec::new(
        settings.index.collection.clone(),
        settings.index.dims,
        settings.index.metric,
    );
    let ingestor = Ingestor::new(
        embedder,
        index.clone(),
        spec,
        chunking,
        settings.chunking.embed_batch_size,
    )?;

    let result = ingestor.ingest_chunks(&chunks).await;
    index.close().await;
    let mut report = result?;
    report.sources = sources.len();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
