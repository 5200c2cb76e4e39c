//! Ranged reads of column chunks.
//!
//! The byte ranges of the column chunks a query needs are coalesced, split
//! into fixed-size backend reads and reassembled into a [`SparseFile`] that
//! the synchronous Parquet reader decodes from.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use futures::{stream, StreamExt, TryStreamExt};
use parquet::errors::ParquetError;
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::reader::{ChunkReader, Length};
use parquet::schema::types::SchemaDescriptor;
use tokio::sync::Semaphore;
use traceblock_config::SearchOptions;

use crate::backend::{BackendError, KeyPath, RawReader, DATA_FILE_NAME};
use crate::error::{BlockError, Result};

/// Byte ranges of the leaf columns of `roots` in row group `rg`.
pub(crate) fn column_ranges(
    schema: &SchemaDescriptor,
    rg: &RowGroupMetaData,
    roots: &[usize],
) -> Vec<Range<u64>> {
    (0..rg.num_columns())
        .filter(|&leaf| roots.contains(&schema.get_column_root_idx(leaf)))
        .map(|leaf| {
            let (start, len) = rg.column(leaf).byte_range();
            start..start + len
        })
        .collect()
}

/// Merge ranges whose gap is at most `max_gap` bytes.
pub(crate) fn coalesce(mut ranges: Vec<Range<u64>>, max_gap: u64) -> Vec<Range<u64>> {
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<u64>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(max_gap) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Split `range` into reads of at most `chunk` bytes.
fn split(range: &Range<u64>, chunk: u64) -> impl Iterator<Item = Range<u64>> + '_ {
    let chunk = chunk.max(1);
    (range.start..range.end)
        .step_by(chunk as usize)
        .map(move |start| start..(start + chunk).min(range.end))
}

/// In-memory view of the fetched regions of the data object.
#[derive(Debug, Clone)]
pub(crate) struct SparseFile {
    len: u64,
    regions: BTreeMap<u64, Bytes>,
}

impl SparseFile {
    fn region(&self, start: u64) -> parquet::errors::Result<(u64, &Bytes)> {
        self.regions
            .range(..=start)
            .next_back()
            .filter(|(offset, bytes)| start < **offset + bytes.len() as u64)
            .map(|(offset, bytes)| (*offset, bytes))
            .ok_or_else(|| ParquetError::General(format!("offset {} was not fetched", start)))
    }

    /// A file with every byte present.
    #[cfg(test)]
    pub(crate) fn whole(bytes: Bytes) -> Self {
        Self {
            len: bytes.len() as u64,
            regions: BTreeMap::from([(0, bytes)]),
        }
    }

    pub fn fetched_bytes(&self) -> u64 {
        self.regions.values().map(|b| b.len() as u64).sum()
    }
}

impl Length for SparseFile {
    fn len(&self) -> u64 {
        self.len
    }
}

impl ChunkReader for SparseFile {
    type T = bytes::buf::Reader<Bytes>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        let (offset, bytes) = self.region(start)?;
        Ok(bytes.slice((start - offset) as usize..).reader())
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        let (offset, bytes) = self.region(start)?;
        let from = (start - offset) as usize;
        if from + length > bytes.len() {
            return Err(ParquetError::General(format!(
                "range {}..{} crosses a fetched region",
                start,
                start + length as u64
            )));
        }
        Ok(bytes.slice(from..from + length))
    }
}

/// Fetches regions of one block's data object.
pub(crate) struct Fetcher<'a> {
    pub reader: &'a dyn RawReader,
    pub keypath: &'a KeyPath,
    pub block_id: uuid::Uuid,
    pub file_len: u64,
    pub options: &'a SearchOptions,
    /// Shared across every fetch of one operation to bound reads in flight.
    pub permits: Arc<Semaphore>,
}

impl Fetcher<'_> {
    async fn read(&self, range: Range<u64>) -> Result<Bytes> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BlockError::invalid_state("read permits closed"))?;
        self.reader
            .read_range(DATA_FILE_NAME, self.keypath, range.start, range.end - range.start)
            .await
            .map_err(|e| match e {
                e @ BackendError::ShortRead { .. } => {
                    BlockError::corrupt(self.block_id, e.to_string())
                }
                other => BlockError::backend("read data", self.block_id, other),
            })
    }

    async fn fetch_region(&self, range: Range<u64>) -> Result<(u64, Bytes)> {
        let pieces: Vec<Bytes> = stream::iter(split(&range, self.options.chunk_size_bytes as u64))
            .map(|piece| self.read(piece))
            .buffered(self.options.read_buffer_count)
            .try_collect()
            .await?;

        let bytes = if pieces.len() == 1 {
            pieces.into_iter().next().unwrap_or_default()
        } else {
            let mut buf = BytesMut::with_capacity((range.end - range.start) as usize);
            for piece in pieces {
                buf.extend_from_slice(&piece);
            }
            buf.freeze()
        };
        Ok((range.start, bytes))
    }

    /// Fetch `ranges` (after coalescing) into a [`SparseFile`].
    pub async fn fetch(&self, ranges: Vec<Range<u64>>) -> Result<SparseFile> {
        for range in &ranges {
            if range.end > self.file_len {
                return Err(BlockError::corrupt(
                    self.block_id,
                    format!(
                        "column chunk {}..{} beyond body of {} bytes",
                        range.start, range.end, self.file_len
                    ),
                ));
            }
        }

        let merged = coalesce(ranges, self.options.read_buffer_size as u64);
        let regions: BTreeMap<u64, Bytes> = stream::iter(merged)
            .map(|range| self.fetch_region(range))
            .buffer_unordered(self.options.read_buffer_count)
            .try_collect()
            .await?;

        Ok(SparseFile {
            len: self.file_len,
            regions,
        })
    }
}
