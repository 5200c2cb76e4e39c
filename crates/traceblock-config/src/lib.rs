// traceblock-config - Configuration for block writers and readers
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority, TRACEBLOCK_ prefix)
// 2. Config file path from TRACEBLOCK_CONFIG env var
// 3. Default config file location (./traceblock.toml)
// 4. Built-in defaults (lowest priority)

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{apply_env_overrides, EnvSource, ENV_PREFIX};
pub use sources::{load_config, load_from_file_path, load_from_str};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub block: BlockConfig,

    #[serde(default)]
    pub search: SearchOptions,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options recognised by the streaming block writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Target false-positive rate of the bloom index, in (0, 1)
    pub bloom_fp: f64,
    /// Target size in bytes of a single bloom shard
    pub bloom_shard_size_bytes: usize,
    /// Upper bound on rows per Parquet row group; a flush always starts a new group
    pub row_group_size_rows: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            bloom_fp: 0.01,
            bloom_shard_size_bytes: 100 * 1024,
            row_group_size_rows: 32 * 1024,
        }
    }
}

/// I/O shaping for block reads. Never changes search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Size of a single ranged read against the backend
    pub chunk_size_bytes: usize,
    /// Maximum number of ranged reads in flight
    pub read_buffer_count: usize,
    /// Adjacent ranges closer than this are fetched with one read
    pub read_buffer_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 1_000_000,
            read_buffer_count: 8,
            read_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Fs,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" | "local" => Ok(StorageBackend::Fs),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            _ => anyhow::bail!("Unsupported storage backend: {}. Supported: fs, memory", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./blocks".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl EngineConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Overlay values from another config (file sources are merged onto defaults)
    pub fn merge(&mut self, other: EngineConfig) {
        self.block = other.block;
        self.search = other.search;
        self.storage.backend = other.storage.backend;
        if other.storage.fs.is_some() {
            self.storage.fs = other.storage.fs;
        }
        self.logging = other.logging;
    }
}

impl BlockConfig {
    pub fn validate(&self) -> Result<()> {
        validation::validate_block_config(self)
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<()> {
        validation::validate_search_options(self)
    }
}
