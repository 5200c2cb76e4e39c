// Logging and storage setup for binaries

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use traceblock_block::OpendalBackend;
use traceblock_config::{EngineConfig, LogFormat, LoggingConfig, StorageBackend};

/// Initialize tracing/logging from LoggingConfig
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so command output on stdout stays machine-readable.
    // Setting the subscriber twice is a no-op.
    let _ = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

/// Build the storage backend named by the config
pub fn open_backend(config: &EngineConfig) -> Result<Arc<OpendalBackend>> {
    match config.storage.backend {
        StorageBackend::Fs => {
            let fs = config.storage.fs.clone().unwrap_or_default();
            info!("Using filesystem storage at: {}", fs.path);
        }
        StorageBackend::Memory => info!("Using in-memory storage"),
    }

    let backend = OpendalBackend::from_config(&config.storage)
        .context("Failed to initialize storage")?;
    Ok(Arc::new(backend))
}
