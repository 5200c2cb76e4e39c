//! Block metadata persisted as `meta.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Self-describing version tag of blocks written by this crate.
pub const VERSION_STRING: &str = "vparquet";

/// Compression applied to the pages of the columnar body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    None,
    #[default]
    Snappy,
    Zstd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    #[serde(rename = "format")]
    pub version: String,
    #[serde(rename = "blockID")]
    pub block_id: Uuid,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Number of traces stored in the body.
    pub total_objects: u64,
    /// Size in bytes of the body object.
    pub size: u64,
    /// Number of row groups in the body.
    pub total_records: u32,
    pub encoding: Encoding,
    pub data_encoding: String,
    pub bloom_shards: u32,
    /// Parquet footer length, including the 8 trailing bytes.
    pub footer_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<u8>,
}

impl BlockMeta {
    pub fn new(
        tenant_id: impl Into<String>,
        block_id: Uuid,
        version: impl Into<String>,
        encoding: Encoding,
        data_encoding: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            block_id,
            tenant_id: tenant_id.into(),
            start_time: None,
            end_time: None,
            total_objects: 0,
            size: 0,
            total_records: 0,
            encoding,
            data_encoding: data_encoding.into(),
            bloom_shards: 0,
            footer_size: 0,
            replication_factor: None,
        }
    }

    /// Widen the time bounds to cover `[start, end]`.
    pub fn extend_range(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        if self.start_time.map_or(true, |current| start < current) {
            self.start_time = Some(start);
        }
        if self.end_time.map_or(true, |current| end > current) {
            self.end_time = Some(end);
        }
    }

    /// Record the time bounds of one added trace.
    ///
    /// `start_nanos`/`end_nanos` are the trace's own times; the partition
    /// hints `start`/`end` (unix seconds) widen the bounds when non-zero.
    pub fn object_added(&mut self, start_nanos: u64, end_nanos: u64, start: u32, end: u32) {
        if let (Some(s), Some(e)) = (from_unix_nanos(start_nanos), from_unix_nanos(end_nanos)) {
            self.extend_range(s, e.max(s));
        }
        if start > 0 {
            if let Some(s) = DateTime::from_timestamp(start as i64, 0) {
                self.extend_range(s, s);
            }
        }
        if end > 0 {
            if let Some(e) = DateTime::from_timestamp(end as i64, 0) {
                self.extend_range(e, e);
            }
        }
    }

    /// True when `[start, end]` (unix seconds, inclusive) may hold any trace of the block.
    ///
    /// Unknown bounds never exclude.
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        match (self.start_time, self.end_time) {
            (Some(block_start), Some(block_end)) => {
                let window_start = DateTime::from_timestamp(start as i64, 0);
                let window_end = DateTime::from_timestamp(end as i64, 0);
                window_end.map_or(true, |end| block_start <= end)
                    && window_start.map_or(true, |start| block_end >= start)
            }
            _ => true,
        }
    }

    /// A block is readable once its body and footer have been written.
    pub fn is_finalised(&self) -> bool {
        self.size > 0 && self.footer_size > 0
    }
}

fn from_unix_nanos(nanos: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(nanos / 1_000_000_000).ok()?;
    DateTime::from_timestamp(secs, (nanos % 1_000_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_added_tracks_min_start_and_max_end() {
        let mut meta = BlockMeta::new("t", Uuid::nil(), VERSION_STRING, Encoding::Zstd, "");
        meta.object_added(1_000_000_000_000, 2_000_000_000_000, 0, 0);
        meta.object_added(500_000_000_000, 600_000_000_000, 0, 0);

        assert_eq!(meta.start_time.unwrap().timestamp(), 500);
        assert_eq!(meta.end_time.unwrap().timestamp(), 2000);
    }

    #[test]
    fn test_partition_hints_widen_bounds() {
        let mut meta = BlockMeta::new("t", Uuid::nil(), VERSION_STRING, Encoding::Zstd, "");
        meta.object_added(1_000_000_000_000, 2_000_000_000_000, 10, 3000);

        assert_eq!(meta.start_time.unwrap().timestamp(), 10);
        assert_eq!(meta.end_time.unwrap().timestamp(), 3000);
    }

    #[test]
    fn test_overlaps_is_inclusive() {
        let mut meta = BlockMeta::new("t", Uuid::nil(), VERSION_STRING, Encoding::Snappy, "");
        assert!(meta.overlaps(1, 2));

        meta.object_added(1_000_000_000_000, 2_000_500_000_000, 0, 0);
        assert!(meta.overlaps(2000, 2001));
        assert!(meta.overlaps(0, 1000));
        assert!(!meta.overlaps(0, 999));
        assert!(!meta.overlaps(2001, 3000));
    }

    #[test]
    fn test_overlaps_compares_sub_second_start() {
        let mut meta = BlockMeta::new("t", Uuid::nil(), VERSION_STRING, Encoding::Snappy, "");
        meta.object_added(2_000_500_000_000, 2_001_000_000_000, 0, 0);
        assert!(!meta.overlaps(1500, 2000));
        assert!(meta.overlaps(1500, 2001));
    }

    #[test]
    fn test_json_field_names() {
        let meta = BlockMeta::new("tenant", Uuid::nil(), VERSION_STRING, Encoding::Snappy, "v1");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["format"], "vparquet");
        assert_eq!(json["tenantID"], "tenant");
        assert_eq!(json["encoding"], "snappy");
        assert!(json.get("startTime").is_none());

        let back: BlockMeta = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
