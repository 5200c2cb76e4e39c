//! Read side of a finished block.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions};
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use traceblock_config::SearchOptions;
use traceblock_core::{SearchRequest, SearchResponse, Trace};
use uuid::Uuid;

use crate::backend::{bloom_name, BackendError, KeyPath, RawReader, DATA_FILE_NAME, META_NAME};
use crate::bloom::{shard_key_for_trace_id, BloomShard};
use crate::error::{BlockError, Result};
use crate::fetch::{column_ranges, Fetcher};
use crate::meta::{BlockMeta, VERSION_STRING};
use crate::search::eval::{self, RowGroupOutcome};
use crate::search::{root_indices, row_group_may_contain_id, CompiledRequest, StatsColumns};
use crate::streaming::{FOOTER_TAIL_LEN, PARQUET_MAGIC};

/// A completed block opened for reading.
///
/// All operations take `&self`; one instance can serve concurrent searches.
#[derive(Clone)]
pub struct BackendBlock {
    meta: BlockMeta,
    keypath: KeyPath,
    reader: Arc<dyn RawReader>,
}

impl std::fmt::Debug for BackendBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendBlock")
            .field("meta", &self.meta)
            .field("keypath", &self.keypath)
            .finish()
    }
}

/// Run `fut`, giving up as soon as `cancel` fires.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(BlockError::cancelled(operation));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BlockError::cancelled(operation)),
        res = fut => res,
    }
}

fn join_failed(block_id: Uuid, index: usize, err: tokio::task::JoinError) -> BlockError {
    BlockError::corrupt(
        block_id,
        format!("row group {} decode task failed: {}", index, err),
    )
}

impl BackendBlock {
    pub fn open(meta: BlockMeta, reader: Arc<dyn RawReader>) -> Result<Self> {
        if meta.version != VERSION_STRING {
            return Err(BlockError::corrupt(
                meta.block_id,
                format!("unsupported block version '{}'", meta.version),
            ));
        }
        if !meta.is_finalised() {
            return Err(BlockError::invalid_state(format!(
                "block {} has not been completed",
                meta.block_id
            )));
        }

        Ok(Self {
            keypath: KeyPath::for_block(&meta.tenant_id, meta.block_id),
            meta,
            reader,
        })
    }

    /// Open a block from its persisted `meta.json`.
    pub async fn open_by_id(
        reader: Arc<dyn RawReader>,
        tenant_id: &str,
        block_id: Uuid,
    ) -> Result<Self> {
        let keypath = KeyPath::for_block(tenant_id, block_id);
        let bytes = reader
            .read(META_NAME, &keypath)
            .await
            .map_err(|e| BlockError::backend("read meta", block_id, e))?;
        let meta: BlockMeta = serde_json::from_slice(&bytes)
            .map_err(|e| BlockError::corrupt(block_id, format!("invalid meta.json: {}", e)))?;
        if meta.block_id != block_id || meta.tenant_id != tenant_id {
            return Err(BlockError::corrupt(
                block_id,
                format!(
                    "meta.json describes block {}/{}",
                    meta.tenant_id, meta.block_id
                ),
            ));
        }
        Self::open(meta, reader)
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn block_id(&self) -> Uuid {
        self.meta.block_id
    }

    fn fetcher<'a>(&'a self, options: &'a SearchOptions) -> Fetcher<'a> {
        Fetcher {
            reader: self.reader.as_ref(),
            keypath: &self.keypath,
            block_id: self.meta.block_id,
            file_len: self.meta.size,
            options,
            permits: Arc::new(Semaphore::new(options.read_buffer_count)),
        }
    }

    async fn read_data_range(&self, offset: u64, len: u64) -> Result<bytes::Bytes> {
        self.reader
            .read_range(DATA_FILE_NAME, &self.keypath, offset, len)
            .await
            .map_err(|e| match e {
                e @ BackendError::ShortRead { .. } => {
                    BlockError::corrupt(self.meta.block_id, e.to_string())
                }
                other => BlockError::backend("read footer", self.meta.block_id, other),
            })
    }

    /// Read and decode the Parquet footer, checking it against `meta`.
    async fn read_parquet_metadata(&self) -> Result<Arc<ParquetMetaData>> {
        let block_id = self.meta.block_id;
        let size = self.meta.size;
        let tail_len = FOOTER_TAIL_LEN as u64;
        if size < tail_len * 2 {
            return Err(BlockError::corrupt(
                block_id,
                format!("body of {} bytes is too small", size),
            ));
        }

        let tail = self.read_data_range(size - tail_len, tail_len).await?;
        if &tail[4..] != PARQUET_MAGIC {
            return Err(BlockError::corrupt(block_id, "missing parquet magic"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&tail[..4]);
        let metadata_len = u32::from_le_bytes(len_bytes) as u64;
        if metadata_len + tail_len > size {
            return Err(BlockError::corrupt(
                block_id,
                format!("footer of {} bytes exceeds body of {} bytes", metadata_len, size),
            ));
        }
        if metadata_len + tail_len != self.meta.footer_size as u64 {
            return Err(BlockError::corrupt(
                block_id,
                format!(
                    "footer is {} bytes, meta.json records {}",
                    metadata_len + tail_len,
                    self.meta.footer_size
                ),
            ));
        }

        let footer = self
            .read_data_range(size - tail_len - metadata_len, metadata_len)
            .await?;
        let metadata = ParquetMetaDataReader::decode_metadata(&footer)
            .map_err(|e| BlockError::corrupt(block_id, format!("invalid footer: {}", e)))?;

        let rows = metadata.file_metadata().num_rows();
        if rows < 0 || rows as u64 != self.meta.total_objects {
            return Err(BlockError::corrupt(
                block_id,
                format!(
                    "footer holds {} traces, meta.json records {}",
                    rows, self.meta.total_objects
                ),
            ));
        }
        if metadata.num_row_groups() != self.meta.total_records as usize {
            return Err(BlockError::corrupt(
                block_id,
                format!(
                    "footer holds {} row groups, meta.json records {}",
                    metadata.num_row_groups(),
                    self.meta.total_records
                ),
            ));
        }

        Ok(Arc::new(metadata))
    }

    fn arrow_metadata(&self, metadata: Arc<ParquetMetaData>) -> Result<ArrowReaderMetadata> {
        ArrowReaderMetadata::try_new(metadata, ArrowReaderOptions::new()).map_err(|e| {
            BlockError::corrupt(self.meta.block_id, format!("incompatible schema: {}", e))
        })
    }

    /// Return every trace of the block that satisfies `req`.
    ///
    /// Fails with `Cancelled` and no partial result when `cancel` fires.
    #[instrument(skip_all, fields(block_id = %self.meta.block_id))]
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        req: &SearchRequest,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        options
            .validate()
            .map_err(|e| BlockError::invalid_config(format!("{:#}", e)))?;
        let request = Arc::new(CompiledRequest::compile(req));
        cancellable(cancel, "search", self.run_search(cancel, request, options)).await
    }

    async fn run_search(
        &self,
        cancel: &CancellationToken,
        request: Arc<CompiledRequest>,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let block_id = self.meta.block_id;
        let mut response = SearchResponse::default();

        if !request.block_may_match(&self.meta) {
            response.metrics.skipped_row_groups = self.meta.total_records;
            debug!("Block excluded by time bounds");
            return Ok(response);
        }

        let metadata = self.read_parquet_metadata().await?;
        let arrow_metadata = self.arrow_metadata(Arc::clone(&metadata))?;
        let schema = metadata.file_metadata().schema_descr();
        let stats = StatsColumns::resolve(schema);
        let roots = root_indices(schema, &request.fetch_columns())
            .map_err(|name| BlockError::corrupt(block_id, format!("missing column '{}'", name)))?;

        let mut selected = Vec::new();
        for (index, rg) in metadata.row_groups().iter().enumerate() {
            if request.row_group_may_match(rg, &stats) {
                response.metrics.inspected_traces += rg.num_rows().max(0) as u64;
                selected.push(index);
            } else {
                response.metrics.skipped_row_groups += 1;
            }
        }
        response.metrics.inspected_row_groups = selected.len() as u32;

        let fetcher = self.fetcher(options);
        let outcomes: Vec<(RowGroupOutcome, u64)> = stream::iter(selected)
            .map(|index| {
                let ranges = column_ranges(schema, metadata.row_group(index), &roots);
                let fetcher = &fetcher;
                let arrow_metadata = arrow_metadata.clone();
                let request = Arc::clone(&request);
                let cancel = cancel.clone();
                async move {
                    let file = fetcher.fetch(ranges).await?;
                    let fetched = file.fetched_bytes();
                    let outcome = tokio::task::spawn_blocking(move || {
                        eval::search_row_group(
                            file,
                            arrow_metadata,
                            index,
                            request,
                            cancel,
                            block_id,
                        )
                    })
                    .await
                    .map_err(|e| join_failed(block_id, index, e))??;
                    Ok::<_, BlockError>((outcome, fetched))
                }
            })
            .buffer_unordered(options.read_buffer_count)
            .try_collect()
            .await?;

        if cancel.is_cancelled() {
            return Err(BlockError::cancelled("search"));
        }

        let mut seen = HashSet::new();
        for (outcome, fetched) in outcomes {
            response.metrics.inspected_bytes += fetched;
            response.metrics.skipped_records += outcome.skipped_records;
            for trace in outcome.traces {
                if seen.insert(trace.trace_id.clone()) {
                    response.traces.push(trace);
                }
            }
        }

        response.traces.sort_by(|a, b| {
            b.start_time_unix_nano
                .cmp(&a.start_time_unix_nano)
                .then_with(|| a.trace_id.cmp(&b.trace_id))
        });
        let limit = request.limit();
        if limit > 0 && response.traces.len() > limit {
            response.traces.truncate(limit);
            response.truncated = true;
        }

        debug!(
            matches = response.traces.len(),
            inspected_row_groups = response.metrics.inspected_row_groups,
            skipped_row_groups = response.metrics.skipped_row_groups,
            inspected_bytes = response.metrics.inspected_bytes,
            skipped_records = response.metrics.skipped_records,
            "Search complete"
        );
        Ok(response)
    }

    /// Look up a single trace by ID.
    #[instrument(skip_all, fields(block_id = %self.meta.block_id))]
    pub async fn find_trace_by_id(
        &self,
        cancel: &CancellationToken,
        trace_id: &[u8],
        options: &SearchOptions,
    ) -> Result<Option<Trace>> {
        options
            .validate()
            .map_err(|e| BlockError::invalid_config(format!("{:#}", e)))?;
        cancellable(cancel, "find trace", self.run_find(cancel, trace_id, options)).await
    }

    async fn might_contain(&self, trace_id: &[u8]) -> Result<bool> {
        let shard_count = self.meta.bloom_shards as usize;
        if shard_count == 0 {
            return Ok(true);
        }
        let block_id = self.meta.block_id;
        let shard = shard_key_for_trace_id(trace_id, shard_count);
        let bytes = self
            .reader
            .read(&bloom_name(shard), &self.keypath)
            .await
            .map_err(|e| BlockError::backend("read bloom", block_id, e))?;
        let bloom = BloomShard::from_bytes(&bytes).ok_or_else(|| {
            BlockError::corrupt(block_id, format!("invalid bloom shard {}", shard))
        })?;
        Ok(bloom.might_contain(trace_id))
    }

    async fn run_find(
        &self,
        cancel: &CancellationToken,
        trace_id: &[u8],
        options: &SearchOptions,
    ) -> Result<Option<Trace>> {
        let block_id = self.meta.block_id;
        if !self.might_contain(trace_id).await? {
            debug!("Trace excluded by bloom");
            return Ok(None);
        }

        let metadata = self.read_parquet_metadata().await?;
        let arrow_metadata = self.arrow_metadata(Arc::clone(&metadata))?;
        let schema = metadata.file_metadata().schema_descr();
        let stats = StatsColumns::resolve(schema);
        let roots: Vec<usize> = (0..schema.root_schema().get_fields().len()).collect();
        let fetcher = self.fetcher(options);

        for (index, rg) in metadata.row_groups().iter().enumerate() {
            if !row_group_may_contain_id(rg, &stats, trace_id) {
                continue;
            }
            let file = fetcher.fetch(column_ranges(schema, rg, &roots)).await?;
            let arrow_metadata = arrow_metadata.clone();
            let id = trace_id.to_vec();
            let cancel = cancel.clone();
            let found = tokio::task::spawn_blocking(move || {
                eval::find_in_row_group(file, arrow_metadata, index, id, cancel, block_id)
            })
            .await
            .map_err(|e| join_failed(block_id, index, e))??;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }
}
