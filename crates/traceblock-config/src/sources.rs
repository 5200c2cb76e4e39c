// Configuration source loading.
//
// Priority order:
// 1. Environment variables (TRACEBLOCK_* prefix)
// 2. Config file path from TRACEBLOCK_CONFIG
// 3. Default config file (./traceblock.toml)
// 4. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::EngineConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "./traceblock.toml";

/// Load configuration using process environment and default file locations.
pub fn load_config() -> Result<EngineConfig> {
    let mut config = EngineConfig::default();

    if let Some(file_config) = load_from_file()? {
        config.merge(file_config);
    }

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a specific file path (for the CLI `--config` flag).
/// Environment overrides still apply on top of the file.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = load_from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

/// Parse TOML content onto the built-in defaults without consulting the environment.
pub fn load_from_str(content: &str) -> Result<EngineConfig> {
    let file_config: EngineConfig = toml::from_str(content)?;
    let mut config = EngineConfig::default();
    config.merge(file_config);
    Ok(config)
}

fn load_from_file() -> Result<Option<EngineConfig>> {
    if let Ok(path) = env::var(format!("{}CONFIG", ENV_PREFIX)) {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    if Path::new(DEFAULT_CONFIG_FILE).exists() {
        let content = std::fs::read_to_string(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("Failed to read config file: {}", DEFAULT_CONFIG_FILE))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", DEFAULT_CONFIG_FILE))?;
        return Ok(Some(config));
    }

    Ok(None)
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogFormat, StorageBackend};

    #[test]
    fn partial_file_keeps_defaults() {
        let config = load_from_str(
            r#"
            [block]
            bloom_fp = 0.001

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.block.bloom_fp, 0.001);
        assert_eq!(config.block.bloom_shard_size_bytes, 100 * 1024);
        assert_eq!(config.search.read_buffer_count, 8);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.storage.backend, StorageBackend::Fs);
    }

    #[test]
    fn file_path_loading_reads_storage_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traceblock.toml");
        std::fs::write(
            &path,
            r#"
            [storage]
            backend = "fs"

            [storage.fs]
            path = "/tmp/blocks"
            "#,
        )
        .unwrap();

        let config = load_from_file_path(&path).unwrap();
        assert_eq!(config.storage.fs.unwrap().path, "/tmp/blocks");
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(load_from_str("block = [").is_err());
    }
}
