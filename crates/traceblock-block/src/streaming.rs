//! Streaming block writer.
//!
//! Traces are buffered as single-row batches. `flush` turns the buffer into
//! one Parquet row group and appends the produced bytes to the data object;
//! `complete` writes the footer, the bloom shards and `meta.json`, after which
//! the block is immutable.

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use traceblock_config::BlockConfig;
use traceblock_core::{block_schema_arc, traces_to_record_batch, Trace};

use crate::backend::{
    bloom_name, AppendWriter, BufferFactory, KeyPath, RawReader, RawWriter, DATA_FILE_NAME,
    DEFAULT_APPEND_BUFFER_BYTES, META_NAME,
};
use crate::bloom::ShardedBloom;
use crate::encoding::writer_properties;
use crate::error::{BlockError, Result};
use crate::meta::BlockMeta;
use crate::reader::BackendBlock;

/// Parquet files end with a 4-byte footer length and the `PAR1` magic.
pub(crate) const FOOTER_TAIL_LEN: usize = 8;
pub(crate) const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    /// An append failed part-way; the data object can no longer be trusted.
    Failed,
    Complete,
}

struct Buffered {
    trace_id: Vec<u8>,
    batch: RecordBatch,
}

pub struct StreamingBlock {
    meta: BlockMeta,
    keypath: KeyPath,
    bloom: ShardedBloom,
    reader: Arc<dyn RawReader>,
    writer: Arc<dyn RawWriter>,
    buffer_factory: BufferFactory,
    parquet: Option<ArrowWriter<Vec<u8>>>,
    appender: Option<Box<dyn AppendWriter>>,
    buffer: Vec<Buffered>,
    buffered_bytes: usize,
    /// Encoded bytes not yet handed to the appender.
    pending: Vec<u8>,
    /// Body bytes encoded since the last successful flush.
    unreported: u64,
    appended: u64,
    state: State,
}

impl StreamingBlock {
    /// Start a new block described by `meta`.
    ///
    /// `meta.total_objects` is taken as the expected trace count when sizing
    /// the bloom index. Nothing is written to the backend until the first flush.
    pub fn new(
        cfg: &BlockConfig,
        meta: BlockMeta,
        reader: Arc<dyn RawReader>,
        writer: Arc<dyn RawWriter>,
        buffer_factory: BufferFactory,
    ) -> Result<Self> {
        cfg.validate()
            .map_err(|e| BlockError::invalid_config(format!("{:#}", e)))?;

        let bloom = ShardedBloom::new(
            cfg.bloom_fp,
            cfg.bloom_shard_size_bytes,
            meta.total_objects as usize,
        );
        let props = writer_properties(meta.encoding, cfg.row_group_size_rows);
        let parquet = ArrowWriter::try_new(Vec::new(), block_schema_arc(), Some(props))
            .map_err(BlockError::encoding)?;

        let mut meta = meta;
        meta.total_objects = 0;
        meta.total_records = 0;
        meta.size = 0;
        meta.footer_size = 0;
        meta.bloom_shards = 0;

        Ok(Self {
            keypath: KeyPath::for_block(&meta.tenant_id, meta.block_id),
            meta,
            bloom,
            reader,
            writer,
            buffer_factory,
            parquet: Some(parquet),
            appender: None,
            buffer: Vec::new(),
            buffered_bytes: 0,
            pending: Vec::new(),
            unreported: 0,
            appended: 0,
            state: State::Open,
        })
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    /// Number of traces added since the last flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Estimated in-memory size of the buffered traces, for flush policies.
    pub fn current_buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Complete => Err(BlockError::invalid_state(format!(
                "block {} is already complete",
                self.meta.block_id
            ))),
            State::Failed => Err(BlockError::invalid_state(format!(
                "block {} failed an earlier write",
                self.meta.block_id
            ))),
        }
    }

    /// Buffer one trace. `start`/`end` are partition hints in unix seconds.
    ///
    /// Nothing is buffered when the trace cannot be encoded.
    pub fn add(&mut self, trace: Trace, start: u32, end: u32) -> Result<()> {
        self.ensure_writable()?;
        if self.parquet.is_none() {
            return Err(BlockError::invalid_state(format!(
                "block {} is being completed",
                self.meta.block_id
            )));
        }

        let batch = traces_to_record_batch(std::slice::from_ref(&trace))?;

        self.meta.object_added(
            trace.start_time_unix_nano,
            trace.end_time_unix_nano,
            start,
            end,
        );
        self.buffered_bytes += batch.get_array_memory_size();
        self.buffer.push(Buffered {
            trace_id: trace.trace_id,
            batch,
        });
        Ok(())
    }

    /// Encode the buffer as one row group and append it to the data object.
    ///
    /// Returns the number of body bytes encoded since the last successful
    /// flush, including those of an earlier cancelled call; 0 when there was
    /// nothing to write.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> Result<u64> {
        self.ensure_writable()?;
        if self.buffer.is_empty() && self.pending.is_empty() && self.unreported == 0 {
            return Ok(0);
        }
        if cancel.is_cancelled() {
            return Err(BlockError::cancelled("flush"));
        }

        let rows = self.buffer.len();
        self.encode_buffer()?;
        self.append_pending(cancel).await?;
        let encoded = std::mem::take(&mut self.unreported);

        debug!(
            block_id = %self.meta.block_id,
            rows,
            bytes = encoded,
            row_groups = self.meta.total_records,
            "Flushed row group"
        );
        Ok(encoded)
    }

    /// Write the buffered traces into a new row group of the Parquet writer.
    fn encode_buffer(&mut self) -> Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let parquet = self
            .parquet
            .as_mut()
            .ok_or_else(|| BlockError::invalid_state("parquet writer already closed"))?;

        let batches: Vec<&RecordBatch> = self.buffer.iter().map(|b| &b.batch).collect();
        let batch = concat_batches(&block_schema_arc(), batches).map_err(BlockError::encoding)?;

        let before = parquet.bytes_written();
        if let Err(e) = parquet.write(&batch).and_then(|_| parquet.flush()) {
            self.state = State::Failed;
            return Err(BlockError::encoding(e));
        }
        let encoded = (parquet.bytes_written() - before) as u64;
        self.unreported += encoded;
        self.pending.append(parquet.inner_mut());

        for buffered in self.buffer.drain(..) {
            self.bloom.add(&buffered.trace_id);
        }
        self.meta.total_objects += batch.num_rows() as u64;
        self.meta.total_records = parquet.flushed_row_groups().len() as u32;
        self.buffered_bytes = 0;
        Ok(encoded)
    }

    async fn append_pending(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(BlockError::cancelled("flush"));
        }

        let block_id = self.meta.block_id;
        if self.appender.is_none() {
            let raw = self
                .writer
                .append(DATA_FILE_NAME, &self.keypath)
                .await
                .map_err(|e| BlockError::backend("open data object", block_id, e))?;
            self.appender = Some((self.buffer_factory)(raw, DEFAULT_APPEND_BUFFER_BYTES));
        }
        let Some(appender) = self.appender.as_mut() else {
            return Err(BlockError::invalid_state("data object not open"));
        };

        let data = Bytes::from(std::mem::take(&mut self.pending));
        let len = data.len() as u64;
        if let Err(e) = appender.append(data).await {
            self.state = State::Failed;
            return Err(BlockError::backend("append data", block_id, e));
        }
        self.appended += len;
        Ok(())
    }

    /// Flush, then finalise the data object, bloom shards and metadata.
    ///
    /// Returns the bytes written by this call. The block is immutable
    /// afterwards and further calls fail with `InvalidState`.
    pub async fn complete(&mut self, cancel: &CancellationToken) -> Result<u64> {
        self.ensure_writable()?;
        if cancel.is_cancelled() {
            return Err(BlockError::cancelled("complete"));
        }
        let block_id = self.meta.block_id;
        let body_before = self.appended;

        self.encode_buffer()?;

        // A retry after a cancelled completion finds the footer already pending.
        if let Some(parquet) = self.parquet.take() {
            let tail = match parquet.into_inner() {
                Ok(tail) => tail,
                Err(e) => {
                    self.state = State::Failed;
                    return Err(BlockError::encoding(e));
                }
            };
            self.meta.footer_size = footer_size(&tail).ok_or_else(|| {
                BlockError::encoding(format!("parquet writer produced no footer for {}", block_id))
            })?;
            self.pending.extend_from_slice(&tail);
        }
        self.append_pending(cancel).await?;

        if cancel.is_cancelled() {
            return Err(BlockError::cancelled("complete"));
        }
        if let Some(mut appender) = self.appender.take() {
            if let Err(e) = appender.close().await {
                self.state = State::Failed;
                return Err(BlockError::backend("close data object", block_id, e));
            }
        }
        self.meta.size = self.appended;
        self.unreported = 0;
        let mut written = self.appended - body_before;

        let shards = self.bloom.marshal();
        for (i, shard) in shards.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(BlockError::cancelled("complete"));
            }
            written += shard.len() as u64;
            self.writer
                .write(&bloom_name(i), &self.keypath, Bytes::from(shard))
                .await
                .map_err(|e| BlockError::backend("write bloom", block_id, e))?;
        }
        self.meta.bloom_shards = self.bloom.shard_count() as u32;

        let meta_json = serde_json::to_vec(&self.meta).map_err(BlockError::encoding)?;
        written += meta_json.len() as u64;
        self.writer
            .write(META_NAME, &self.keypath, Bytes::from(meta_json))
            .await
            .map_err(|e| BlockError::backend("write meta", block_id, e))?;

        self.state = State::Complete;
        info!(
            block_id = %block_id,
            tenant = %self.meta.tenant_id,
            traces = self.meta.total_objects,
            row_groups = self.meta.total_records,
            size = self.meta.size,
            bloom_shards = self.meta.bloom_shards,
            "Completed block"
        );
        Ok(written)
    }

    /// Reader over the finished block.
    pub fn into_backend_block(self) -> Result<BackendBlock> {
        if self.state != State::Complete {
            return Err(BlockError::invalid_state(format!(
                "block {} is not complete",
                self.meta.block_id
            )));
        }
        BackendBlock::open(self.meta, self.reader)
    }
}

/// Length of the Parquet footer at the end of `tail`, trailing 8 bytes included.
fn footer_size(tail: &[u8]) -> Option<u32> {
    let start = tail.len().checked_sub(FOOTER_TAIL_LEN)?;
    let trailer = &tail[start..];
    if &trailer[4..] != PARQUET_MAGIC {
        return None;
    }
    let metadata_len = u32::from_le_bytes(trailer[..4].try_into().ok()?);
    metadata_len.checked_add(FOOTER_TAIL_LEN as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{unbuffered, BufferedAppendWriter, OpendalBackend};
    use crate::meta::{Encoding, VERSION_STRING};
    use traceblock_core::{ResourceSpans, TRACE_ID_LEN};
    use uuid::Uuid;

    fn fs_backend(dir: &tempfile::TempDir) -> Arc<OpendalBackend> {
        let builder = opendal::services::Fs::default().root(&dir.path().to_string_lossy());
        let op = opendal::Operator::new(builder).unwrap().finish();
        Arc::new(OpendalBackend::new(op))
    }

    fn new_block(backend: &Arc<OpendalBackend>, factory: BufferFactory) -> StreamingBlock {
        let meta = BlockMeta::new("tenant", Uuid::new_v4(), VERSION_STRING, Encoding::Snappy, "");
        StreamingBlock::new(
            &BlockConfig::default(),
            meta,
            backend.clone(),
            backend.clone(),
            factory,
        )
        .unwrap()
    }

    fn trace(n: u8) -> Trace {
        Trace {
            trace_id: vec![n; TRACE_ID_LEN],
            start_time_unix_nano: 1_000_000_000_000,
            end_time_unix_nano: 2_000_000_000_000,
            duration_nanos: 1_000_000_000_000,
            root_service_name: "svc".into(),
            root_span_name: "root".into(),
            resource_spans: vec![ResourceSpans::default()],
        }
    }

    #[test]
    fn test_footer_size_reads_trailer() {
        let mut tail = vec![0u8; 20];
        tail.extend_from_slice(&12u32.to_le_bytes());
        tail.extend_from_slice(PARQUET_MAGIC);
        assert_eq!(footer_size(&tail), Some(20));
        assert_eq!(footer_size(b"PAR1"), None);
        assert_eq!(footer_size(b"xxxxxxxxxxxx"), None);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let cfg = BlockConfig {
            bloom_fp: 1.5,
            ..Default::default()
        };
        let meta = BlockMeta::new("t", Uuid::new_v4(), VERSION_STRING, Encoding::Snappy, "");
        let err = StreamingBlock::new(&cfg, meta, backend.clone(), backend, unbuffered)
            .err()
            .unwrap();
        assert!(matches!(err, BlockError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let mut block = new_block(&backend, unbuffered);
        let cancel = CancellationToken::new();

        assert_eq!(block.flush(&cancel).await.unwrap(), 0);
        assert!(block.appender.is_none());

        block.add(trace(1), 0, 0).unwrap();
        assert!(block.flush(&cancel).await.unwrap() > 0);
        assert_eq!(block.flush(&cancel).await.unwrap(), 0);
        assert_eq!(block.meta().total_records, 1);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_trace_without_buffering() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let mut block = new_block(&backend, unbuffered);

        let mut bad = trace(1);
        bad.trace_id = vec![1, 2];
        let err = block.add(bad, 0, 0).unwrap_err();
        assert!(matches!(err, BlockError::Encoding { .. }));
        assert_eq!(block.buffered_len(), 0);
        assert!(block.meta().start_time.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_flush_keeps_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let mut block = new_block(&backend, unbuffered);
        block.add(trace(1), 0, 0).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(block.flush(&cancel).await.unwrap_err().is_cancelled());
        assert_eq!(block.buffered_len(), 1);

        let fresh = CancellationToken::new();
        assert!(block.flush(&fresh).await.unwrap() > 0);
        assert_eq!(block.meta().total_objects, 1);
    }

    #[tokio::test]
    async fn test_flush_reports_bytes_encoded_before_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let mut block = new_block(&backend, unbuffered);
        block.add(trace(1), 0, 0).unwrap();

        // a flush cancelled after encoding leaves the row group unappended
        let encoded = block.encode_buffer().unwrap();
        assert!(encoded > 0);
        assert_eq!(block.buffered_len(), 0);

        let cancel = CancellationToken::new();
        assert_eq!(block.flush(&cancel).await.unwrap(), encoded);
        assert_eq!(block.flush(&cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let mut block = new_block(&backend, BufferedAppendWriter::boxed);
        let cancel = CancellationToken::new();

        block.add(trace(1), 0, 0).unwrap();
        block.add(trace(2), 0, 0).unwrap();
        assert!(block.complete(&cancel).await.unwrap() > 0);
        assert!(block.is_complete());

        let meta = block.meta().clone();
        assert_eq!(meta.total_objects, 2);
        assert_eq!(meta.total_records, 1);
        assert_eq!(meta.bloom_shards, 1);
        assert!(meta.footer_size > FOOTER_TAIL_LEN as u32);

        let size = backend
            .size(DATA_FILE_NAME, &KeyPath::for_block("tenant", meta.block_id))
            .await
            .unwrap();
        assert_eq!(size, meta.size);

        assert!(matches!(
            block.add(trace(3), 0, 0),
            Err(BlockError::InvalidState { .. })
        ));
        assert!(matches!(
            block.flush(&cancel).await,
            Err(BlockError::InvalidState { .. })
        ));
        assert!(matches!(
            block.complete(&cancel).await,
            Err(BlockError::InvalidState { .. })
        ));
    }
}
