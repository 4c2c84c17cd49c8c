//! fretmatch server binary.
//!
//! ```text
//! fretmatch [--config PATH] [serve]
//! fretmatch [--config PATH] seed [--recreate]
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fretmatch::FretmatchConfig;
use fretmatch::server::{init_tracing, install_metrics_recorder, start_server};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Real-time guitar chord recognition server
#[derive(Parser)]
#[command(name = "fretmatch")]
#[command(version, about)]
struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, env = "FRETMATCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve WebSocket inference and health endpoints (default)
    Serve,
    /// Create the external index collection and upload the chord catalog
    Seed {
        /// Drop the collection before seeding
        #[arg(long)]
        recreate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = FretmatchConfig::load(cli.config.as_deref())?;
    init_tracing(&config.server.log_level, config.server.json_logs);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let metrics = if config.server.metrics_enabled {
                Some(install_metrics_recorder()?)
            } else {
                None
            };
            start_server(config, metrics).await
        }
        Command::Seed { recreate } => seed(&config, recreate).await,
    }
}

#[cfg(feature = "qdrant")]
async fn seed(config: &FretmatchConfig, recreate: bool) -> anyhow::Result<()> {
    use std::time::Duration;

    use anyhow::Context;
    use fretmatch::index::{QdrantBackend, QdrantConfig};
    use fretmatch::{CatalogSource, ChordCatalog, Projector};

    let url = config
        .index
        .url
        .clone()
        .context("index.url must be set to seed an external index")?;

    let inference = &config.inference;
    let projector = Projector::from_mode(
        inference.embedding_mode,
        inference.projection_path.as_deref(),
    )?;
    let catalog = ChordCatalog::load(
        &CatalogSource::from_path(inference.catalog_path.as_deref()),
        &projector,
    )?;

    // Upserts are far slower than a search; the query timeout does not apply.
    let backend = QdrantBackend::new(
        QdrantConfig {
            url,
            collection: config.index.collection.clone(),
            timeout: Duration::from_secs(30),
            api_key: config.index.api_key.clone(),
        },
        catalog.dim(),
    )?;

    if recreate {
        backend.delete_collection().await?;
        tracing::info!(collection = %config.index.collection, "dropped collection");
    }
    backend.ensure_collection().await?;
    let count = backend.upsert_catalog(&catalog).await?;

    tracing::info!(
        collection = %config.index.collection,
        count,
        dim = catalog.dim(),
        "seeding complete"
    );
    Ok(())
}

#[cfg(not(feature = "qdrant"))]
async fn seed(_config: &FretmatchConfig, _recreate: bool) -> anyhow::Result<()> {
    anyhow::bail!("seeding requires the `qdrant` feature")
}
