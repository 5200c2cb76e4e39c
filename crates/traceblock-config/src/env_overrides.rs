use super::{EngineConfig, FsConfig, LogFormat, StorageBackend};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "TRACEBLOCK_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    /// Get a variable by its name without the `TRACEBLOCK_` prefix
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the engine config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut EngineConfig, env: &E) -> Result<()> {
    // Block writer
    if let Some(val) = get_env_f64(env, "BLOOM_FP")? {
        config.block.bloom_fp = val;
    }
    if let Some(val) = get_env_usize(env, "BLOOM_SHARD_SIZE_BYTES")? {
        config.block.bloom_shard_size_bytes = val;
    }
    if let Some(val) = get_env_usize(env, "ROW_GROUP_SIZE_ROWS")? {
        config.block.row_group_size_rows = val;
    }

    // Search I/O shaping
    if let Some(val) = get_env_usize(env, "CHUNK_SIZE_BYTES")? {
        config.search.chunk_size_bytes = val;
    }
    if let Some(val) = get_env_usize(env, "READ_BUFFER_COUNT")? {
        config.search.read_buffer_count = val;
    }
    if let Some(val) = get_env_usize(env, "READ_BUFFER_SIZE")? {
        config.search.read_buffer_size = val;
    }

    // Storage backend
    if let Some(backend) = env.get("STORAGE_BACKEND") {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid TRACEBLOCK_STORAGE_BACKEND value")?;
    }
    if let Some(path) = env.get("STORAGE_PATH") {
        config.storage.fs.get_or_insert_with(FsConfig::default).path = path;
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.logging.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    Ok(())
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_f64<E: EnvSource>(env: &E, key: &str) -> Result<Option<f64>> {
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .parse::<f64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let env = MapEnv(HashMap::from([
            ("BLOOM_FP", "0.05"),
            ("READ_BUFFER_COUNT", "2"),
            ("STORAGE_BACKEND", "memory"),
            ("LOG_FORMAT", "JSON"),
        ]));

        let mut config = EngineConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.block.bloom_fp, 0.05);
        assert_eq!(config.search.read_buffer_count, 2);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn unparsable_numbers_are_errors() {
        let env = MapEnv(HashMap::from([("CHUNK_SIZE_BYTES", "lots")]));
        let mut config = EngineConfig::default();
        let err = apply_env_overrides(&mut config, &env).unwrap_err();
        assert!(err.to_string().contains("TRACEBLOCK_CHUNK_SIZE_BYTES"));
    }

    #[test]
    fn storage_path_creates_fs_section() {
        let env = MapEnv(HashMap::from([("STORAGE_PATH", "/var/lib/blocks")]));
        let mut config = EngineConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();
        assert_eq!(config.storage.fs.unwrap().path, "/var/lib/blocks");
    }
}
