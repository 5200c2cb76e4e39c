//! Synchronous decoding of one row group, run on a blocking thread.

use std::sync::Arc;

use arrow::array::BinaryArray;
use arrow::compute::kernels::cmp::eq;
use arrow::error::ArrowError;
use parquet::arrow::arrow_reader::{
    ArrowPredicateFn, ArrowReaderMetadata, ParquetRecordBatchReaderBuilder, RowFilter,
};
use parquet::arrow::ProjectionMask;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use traceblock_core::schema::column;
use traceblock_core::{
    record_batch_to_traces, trace_id_to_hex, Trace, TraceColumns, TraceSearchMetadata,
};
use uuid::Uuid;

use super::{root_indices, CompiledRequest, SUMMARY_COLUMNS};
use crate::error::{BlockError, Result};
use crate::fetch::SparseFile;

const BATCH_SIZE: usize = 1024;

/// Matches found in one row group.
#[derive(Debug, Default)]
pub(crate) struct RowGroupOutcome {
    pub traces: Vec<TraceSearchMetadata>,
    pub skipped_records: u32,
}

fn corrupt(block_id: Uuid, row_group: usize, err: impl std::fmt::Display) -> BlockError {
    BlockError::corrupt(block_id, format!("row group {}: {}", row_group, err))
}

/// Evaluate `request` against row group `row_group` of `file`.
pub(crate) fn search_row_group(
    file: SparseFile,
    metadata: ArrowReaderMetadata,
    row_group: usize,
    request: Arc<CompiledRequest>,
    cancel: CancellationToken,
    block_id: Uuid,
) -> Result<RowGroupOutcome> {
    let schema = metadata.metadata().file_metadata().schema_descr_ptr();
    let projection = root_indices(&schema, &SUMMARY_COLUMNS)
        .map_err(|name| corrupt(block_id, row_group, format!("missing column '{}'", name)))?;
    let filter = request
        .row_filter(&schema)
        .map_err(|name| corrupt(block_id, row_group, format!("missing column '{}'", name)))?;

    let mut builder = ParquetRecordBatchReaderBuilder::new_with_metadata(file, metadata)
        .with_row_groups(vec![row_group])
        .with_batch_size(BATCH_SIZE)
        .with_projection(ProjectionMask::roots(&schema, projection));
    if let Some(filter) = filter {
        builder = builder.with_row_filter(filter);
    }
    let reader = builder
        .build()
        .map_err(|e| corrupt(block_id, row_group, e))?;

    let mut outcome = RowGroupOutcome::default();
    for batch in reader {
        if cancel.is_cancelled() {
            return Err(BlockError::cancelled("search"));
        }
        let batch = batch.map_err(|e| corrupt(block_id, row_group, e))?;
        let columns = TraceColumns::try_new(&batch).map_err(|e| corrupt(block_id, row_group, e))?;

        for row in 0..batch.num_rows() {
            if let Err(e) = columns.check_row(row) {
                warn!(
                    block_id = %block_id,
                    row_group,
                    error = %BlockError::decode(block_id, e),
                    "Skipping malformed record"
                );
                outcome.skipped_records += 1;
                continue;
            }

            let duration_ms = columns.duration.value(row) / 1_000_000;
            outcome.traces.push(TraceSearchMetadata {
                trace_id: trace_id_to_hex(columns.trace_id.value(row)),
                start_time_unix_nano: columns.start.value(row),
                duration_ms: u32::try_from(duration_ms).unwrap_or(u32::MAX),
                root_service_name: columns.root_service_name.value(row).to_string(),
                root_trace_name: columns.root_span_name.value(row).to_string(),
            });
        }
    }
    Ok(outcome)
}

/// Decode the trace with `trace_id` from row group `row_group`, if present.
pub(crate) fn find_in_row_group(
    file: SparseFile,
    metadata: ArrowReaderMetadata,
    row_group: usize,
    trace_id: Vec<u8>,
    cancel: CancellationToken,
    block_id: Uuid,
) -> Result<Option<Trace>> {
    let schema = metadata.metadata().file_metadata().schema_descr_ptr();
    let id_column = root_indices(&schema, &[column::TRACE_ID])
        .map_err(|name| corrupt(block_id, row_group, format!("missing column '{}'", name)))?;

    let predicate = ArrowPredicateFn::new(ProjectionMask::roots(&schema, id_column), move |batch| {
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<BinaryArray>()
            .ok_or_else(|| ArrowError::SchemaError("TraceID is not binary".to_string()))?;
        eq(ids, &BinaryArray::new_scalar(&trace_id))
    });

    let reader = ParquetRecordBatchReaderBuilder::new_with_metadata(file, metadata)
        .with_row_groups(vec![row_group])
        .with_batch_size(BATCH_SIZE)
        .with_row_filter(RowFilter::new(vec![Box::new(predicate)]))
        .build()
        .map_err(|e| corrupt(block_id, row_group, e))?;

    for batch in reader {
        if cancel.is_cancelled() {
            return Err(BlockError::cancelled("find trace"));
        }
        let batch = batch.map_err(|e| corrupt(block_id, row_group, e))?;
        let mut traces = record_batch_to_traces(&batch).map_err(|e| {
            if e.is_structural() {
                corrupt(block_id, row_group, e)
            } else {
                BlockError::decode(block_id, e)
            }
        })?;
        if let Some(trace) = traces.pop() {
            return Ok(Some(trace));
        }
    }
    Ok(None)
}
