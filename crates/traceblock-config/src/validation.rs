// Configuration validation
//
// Validates that values are inside the ranges the engine can work with

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &EngineConfig) -> Result<()> {
    validate_block_config(&config.block)?;
    validate_search_options(&config.search)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

pub(crate) fn validate_block_config(config: &BlockConfig) -> Result<()> {
    if !(config.bloom_fp > 0.0 && config.bloom_fp < 1.0) {
        bail!(
            "block.bloom_fp must be between 0 and 1 (exclusive), got {}",
            config.bloom_fp
        );
    }

    if config.bloom_shard_size_bytes == 0 {
        bail!("block.bloom_shard_size_bytes must be greater than 0");
    }

    if config.row_group_size_rows == 0 {
        bail!("block.row_group_size_rows must be greater than 0");
    }

    if config.bloom_shard_size_bytes > 64 * 1024 * 1024 {
        warn!(
            bloom_shard_size_bytes = config.bloom_shard_size_bytes,
            "block.bloom_shard_size_bytes is very large; shards are held in memory while writing"
        );
    }

    Ok(())
}

pub(crate) fn validate_search_options(options: &SearchOptions) -> Result<()> {
    if options.chunk_size_bytes == 0 {
        bail!("search.chunk_size_bytes must be greater than 0");
    }

    if options.read_buffer_count == 0 {
        bail!("search.read_buffer_count must be greater than 0");
    }

    if options.read_buffer_size == 0 {
        bail!("search.read_buffer_size must be greater than 0");
    }

    if options.read_buffer_count > 256 {
        warn!(
            read_buffer_count = options.read_buffer_count,
            "search.read_buffer_count is very large; may exhaust backend connections"
        );
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.backend == StorageBackend::Fs {
        if let Some(fs) = &config.fs {
            if fs.path.is_empty() {
                bail!("storage.fs.path must not be empty");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_bloom_fp() {
        for fp in [0.0, 1.0, -0.5, f64::NAN] {
            let config = BlockConfig {
                bloom_fp: fp,
                ..Default::default()
            };
            assert!(validate_block_config(&config).is_err(), "fp {fp}");
        }
    }

    #[test]
    fn rejects_zero_io_shaping() {
        let options = SearchOptions {
            read_buffer_count: 0,
            ..Default::default()
        };
        assert!(validate_search_options(&options).is_err());
        assert!(validate_search_options(&SearchOptions::default()).is_ok());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }
}
