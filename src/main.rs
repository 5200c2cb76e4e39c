use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use traceblock::{
    hex_to_trace_id, init_tracing, open_backend, BackendBlock, EngineConfig, SearchRequest,
    StorageBackend,
};
use uuid::Uuid;

/// Search and inspect traceblock blocks
#[derive(Parser)]
#[command(name = "traceblock")]
#[command(version)]
#[command(about = "Search and inspect columnar trace blocks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Root directory of the block store (filesystem backend only)
    #[arg(short, long, value_name = "DIR", global = true)]
    data: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(clap::Args)]
struct BlockArgs {
    /// Tenant that owns the block
    #[arg(long, default_value = "single-tenant")]
    tenant: String,

    /// Block ID
    #[arg(long)]
    block: Uuid,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the metadata of a block
    Meta {
        #[command(flatten)]
        block: BlockArgs,
    },
    /// Run a predicate search against a block
    Search {
        #[command(flatten)]
        block: BlockArgs,

        /// Tag filter, repeatable: key=value
        #[arg(short, long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Window start, unix seconds
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// Window end, unix seconds
        #[arg(long, default_value_t = 0)]
        end: u32,

        /// Minimum trace duration in milliseconds
        #[arg(long, default_value_t = 0)]
        min_duration: u32,

        /// Maximum trace duration in milliseconds
        #[arg(long, default_value_t = 0)]
        max_duration: u32,

        /// Maximum number of results, 0 for all
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },
    /// Fetch one trace by ID
    Find {
        #[command(flatten)]
        block: BlockArgs,

        /// Trace ID in hex; leading zeros may be omitted
        #[arg(long)]
        trace_id: String,
    },
}

fn parse_tag(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => traceblock_config::load_from_file_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::load().context("Failed to load configuration")?,
    };
    apply_cli_overrides(&mut config, &cli)?;
    init_tracing(&config.logging);

    let backend = open_backend(&config)?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match cli.command {
        Commands::Meta { block } => {
            let block = BackendBlock::open_by_id(backend, &block.tenant, block.block).await?;
            println!("{}", serde_json::to_string_pretty(block.meta())?);
        }
        Commands::Search {
            block,
            tags,
            start,
            end,
            min_duration,
            max_duration,
            limit,
        } => {
            let block = BackendBlock::open_by_id(backend, &block.tenant, block.block).await?;
            let mut request = SearchRequest::default()
                .with_window(start, end)
                .with_duration(min_duration, max_duration)
                .with_limit(limit);
            request.tags.extend(tags);

            let response = block.search(&cancel, &request, &config.search).await?;
            info!(
                matches = response.traces.len(),
                inspected_bytes = response.metrics.inspected_bytes,
                truncated = response.truncated,
                "Search finished"
            );
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Find { block, trace_id } => {
            let id = hex_to_trace_id(&trace_id)
                .with_context(|| format!("Invalid trace ID '{}'", trace_id))?;
            let block = BackendBlock::open_by_id(backend, &block.tenant, block.block).await?;
            match block.find_trace_by_id(&cancel, &id, &config.search).await? {
                Some(trace) => {
                    info!(spans = trace.span_count(), "Trace found");
                    println!("{}", serde_json::to_string_pretty(&trace)?);
                }
                None => anyhow::bail!("Trace {} not found in block {}", trace_id, block.block_id()),
            }
        }
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut EngineConfig, cli: &Cli) -> Result<()> {
    if let Some(data) = &cli.data {
        if config.storage.backend != StorageBackend::Fs {
            anyhow::bail!(
                "--data flag only works with filesystem backend, but backend is '{}'",
                config.storage.backend
            );
        }
        let fs = config.storage.fs.get_or_insert_with(Default::default);
        fs.path = data.to_string_lossy().to_string();
    }

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, cancelling");
            cancel.cancel();
        }
        Err(e) => tracing::error!("Failed to install Ctrl+C handler: {}", e),
    }
}
