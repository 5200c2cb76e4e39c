use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;
use traceblock_core::schema::{SCHEMA_VERSION, SCHEMA_VERSION_KEY};

use crate::meta::{Encoding, VERSION_STRING};

/// Key/value entry naming the block format in every Parquet footer.
pub const BLOCK_VERSION_KEY: &str = "traceblock.block_version";

fn compression(encoding: Encoding) -> Compression {
    match encoding {
        Encoding::None => Compression::UNCOMPRESSED,
        Encoding::Snappy => Compression::SNAPPY,
        Encoding::Zstd => Compression::ZSTD(ZstdLevel::default()),
    }
}

/// Writer properties for a block body.
///
/// - Compression from the block's [`Encoding`]
/// - Dictionary encoding enabled
/// - Chunk-level statistics so readers can prune row groups
/// - `max_row_group_size` caps rows per group; every flush also closes a group
/// - Format and schema version embedded in the footer
pub(crate) fn writer_properties(encoding: Encoding, max_row_group_size: usize) -> WriterProperties {
    let metadata = vec![
        KeyValue {
            key: BLOCK_VERSION_KEY.to_string(),
            value: Some(VERSION_STRING.to_string()),
        },
        KeyValue {
            key: SCHEMA_VERSION_KEY.to_string(),
            value: Some(SCHEMA_VERSION.to_string()),
        },
        KeyValue {
            key: "traceblock.version".to_string(),
            value: Some(env!("CARGO_PKG_VERSION").to_string()),
        },
    ];

    WriterProperties::builder()
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_compression(compression(encoding))
        .set_data_page_size_limit(256 * 1024)
        .set_write_batch_size(8 * 1024)
        .set_max_row_group_size(max_row_group_size.max(1))
        .set_dictionary_page_size_limit(128 * 1024)
        .set_key_value_metadata(Some(metadata))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::schema::types::ColumnPath;

    #[test]
    fn test_properties_follow_encoding() {
        let props = writer_properties(Encoding::Zstd, 100);
        let path = ColumnPath::from("TraceID");
        assert!(matches!(props.compression(&path), Compression::ZSTD(_)));
        assert_eq!(props.max_row_group_size(), 100);
        assert_eq!(props.statistics_enabled(&path), EnabledStatistics::Chunk);

        let props = writer_properties(Encoding::None, 0);
        assert_eq!(props.compression(&path), Compression::UNCOMPRESSED);
        assert_eq!(props.max_row_group_size(), 1);
    }

    #[test]
    fn test_footer_metadata_names_format() {
        let props = writer_properties(Encoding::Snappy, 10);
        let kv = props.key_value_metadata().unwrap();
        assert!(kv
            .iter()
            .any(|e| e.key == BLOCK_VERSION_KEY && e.value.as_deref() == Some(VERSION_STRING)));
    }
}
