use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use memweave::config::{ClusteringAlgorithm, ConfigLoader};
use memweave::error::ErrorReport;
use memweave::models::{MemoryCategory, MemoryItem};
use memweave::observability::init_tracing;
use memweave::services::{TracingEventListener, create_clustering_service_with_listeners};
use tracing::info;

/// memweave - cluster memory items and map clusters onto categories
#[derive(Parser)]
#[command(name = "memweave")]
#[command(version = "0.1.0")]
#[command(about = "Run one clustering and categorization pass over a JSON file of memory items")]
struct Cli {
    /// JSON array of memory items (id, content, embedding, ...)
    #[arg(short, long)]
    items: PathBuf,

    /// Configuration file (defaults to ./config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON array of categories to register before the run
    #[arg(long)]
    categories: Option<PathBuf>,

    /// Override the configured algorithm
    #[arg(short, long, value_parser = parse_algorithm)]
    algorithm: Option<ClusteringAlgorithm>,

    /// Fixed random seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Pretty-print the JSON result
    #[arg(long)]
    pretty: bool,
}

fn parse_algorithm(value: &str) -> Result<ClusteringAlgorithm, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown algorithm '{value}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from(path.clone()),
        None => ConfigLoader::load(),
    }
    .context("failed to load configuration")?;
    if let Some(algorithm) = cli.algorithm {
        config.clustering.algorithm = algorithm;
    }
    if cli.seed.is_some() {
        config.clustering.seed = cli.seed;
    }
    ConfigLoader::validate(&config).context("invalid configuration")?;

    let _guard = init_tracing(&config.logging)?;
    info!(
        app = %config.app_name,
        environment = %config.environment,
        algorithm = %config.clustering.algorithm,
        "Starting memweave"
    );

    let raw = tokio::fs::read_to_string(&cli.items)
        .await
        .with_context(|| format!("failed to read {}", cli.items.display()))?;
    let items: Vec<MemoryItem> =
        serde_json::from_str(&raw).context("items file is not a JSON array of memory items")?;
    info!(count = items.len(), "Items loaded");

    let service =
        create_clustering_service_with_listeners(&config, vec![Arc::new(TracingEventListener)])?;

    if let Some(path) = &cli.categories {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let categories: Vec<MemoryCategory> =
            serde_json::from_str(&raw).context("categories file is not a JSON array")?;
        for category in categories {
            service.register_category(category).await?;
        }
    }

    let result = match service.run(items).await {
        Ok(result) => result,
        Err(e) => {
            let report = ErrorReport::from(&e).with_operation("run");
            eprintln!("{}", serde_json::to_string(&report)?);
            return Err(e.into());
        }
    };
    info!("{}", result.summary());

    let output = if cli.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{output}");

    Ok(())
}
