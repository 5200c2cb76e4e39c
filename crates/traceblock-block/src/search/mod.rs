//! Predicate search over a single block.
//!
//! A [`SearchRequest`] is compiled once into a [`CompiledRequest`], which
//! prunes row groups on column statistics and produces the Parquet row filter
//! that evaluates the remaining predicates during decoding.

use std::sync::Arc;

use arrow::array::{AsArray, BooleanArray, RecordBatch, UInt64Array};
use arrow::compute::and;
use arrow::compute::kernels::cmp::{gt_eq, lt_eq};
use arrow::datatypes::UInt64Type;
use arrow::error::ArrowError;
use parquet::arrow::arrow_reader::{ArrowPredicate, ArrowPredicateFn, RowFilter};
use parquet::arrow::ProjectionMask;
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::statistics::Statistics;
use parquet::schema::types::SchemaDescriptor;
use traceblock_core::decode::ResourceSpansColumns;
use traceblock_core::schema::column;
use traceblock_core::SearchRequest;

use crate::meta::BlockMeta;

pub(crate) mod eval;
mod tags;

pub use tags::TagMatcher;

const NANOS_PER_SECOND: u64 = 1_000_000_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

/// Inclusive window in nanoseconds, `[start * 1e9, end * 1e9]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start_secs: u32,
    end_secs: u32,
    start: u64,
    end: u64,
}

impl Window {
    fn from_secs(start: u32, end: u32) -> Option<Self> {
        if start == 0 && end == 0 {
            return None;
        }
        Some(Self {
            start_secs: start,
            end_secs: end,
            start: start as u64 * NANOS_PER_SECOND,
            end: end as u64 * NANOS_PER_SECOND,
        })
    }
}

/// Inclusive duration bounds in nanoseconds, derived from whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DurationBounds {
    min: Option<u64>,
    max: Option<u64>,
}

impl DurationBounds {
    fn from_millis(min_ms: u32, max_ms: u32) -> Option<Self> {
        let bounds = Self {
            min: (min_ms > 0).then(|| min_ms as u64 * NANOS_PER_MILLI),
            max: (max_ms > 0).then(|| max_ms as u64 * NANOS_PER_MILLI + (NANOS_PER_MILLI - 1)),
        };
        (bounds.min.is_some() || bounds.max.is_some()).then_some(bounds)
    }
}

/// Leaf column indices of the top-level columns that carry pruning statistics.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StatsColumns {
    pub trace_id: Option<usize>,
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub duration: Option<usize>,
}

impl StatsColumns {
    pub fn resolve(schema: &SchemaDescriptor) -> Self {
        let leaf = |name: &str| {
            schema.columns().iter().position(|col| {
                let parts = col.path().parts();
                parts.len() == 1 && parts[0] == name
            })
        };
        Self {
            trace_id: leaf(column::TRACE_ID),
            start: leaf(column::START_TIME_UNIX_NANO),
            end: leaf(column::END_TIME_UNIX_NANO),
            duration: leaf(column::DURATION_NANOS),
        }
    }
}

fn u64_bounds(rg: &RowGroupMetaData, leaf: Option<usize>) -> (Option<u64>, Option<u64>) {
    let Some(leaf) = leaf.filter(|&i| i < rg.num_columns()) else {
        return (None, None);
    };
    match rg.column(leaf).statistics() {
        Some(Statistics::Int64(stats)) => (
            stats.min_opt().map(|v| *v as u64),
            stats.max_opt().map(|v| *v as u64),
        ),
        _ => (None, None),
    }
}

/// True when the TraceID statistics of `rg` admit `trace_id`. Missing
/// statistics never exclude.
pub(crate) fn row_group_may_contain_id(
    rg: &RowGroupMetaData,
    stats: &StatsColumns,
    trace_id: &[u8],
) -> bool {
    let Some(leaf) = stats.trace_id.filter(|&i| i < rg.num_columns()) else {
        return true;
    };
    match rg.column(leaf).statistics() {
        Some(Statistics::ByteArray(s)) => {
            let above_min = s.min_opt().map_or(true, |min| min.data() <= trace_id);
            let below_max = s.max_opt().map_or(true, |max| trace_id <= max.data());
            above_min && below_max
        }
        _ => true,
    }
}

/// Index of each named root column in the Parquet schema.
pub(crate) fn root_indices(
    schema: &SchemaDescriptor,
    names: &[&'static str],
) -> std::result::Result<Vec<usize>, &'static str> {
    let roots = schema.root_schema().get_fields();
    names
        .iter()
        .map(|name| {
            roots
                .iter()
                .position(|field| field.name() == *name)
                .ok_or(*name)
        })
        .collect()
}

/// Columns decoded for every matching trace.
pub(crate) const SUMMARY_COLUMNS: [&str; 6] = [
    column::TRACE_ID,
    column::START_TIME_UNIX_NANO,
    column::END_TIME_UNIX_NANO,
    column::DURATION_NANOS,
    column::ROOT_SERVICE_NAME,
    column::ROOT_SPAN_NAME,
];

const TIME_COLUMNS: [&str; 3] = [
    column::START_TIME_UNIX_NANO,
    column::END_TIME_UNIX_NANO,
    column::DURATION_NANOS,
];

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array, ArrowError> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_primitive_opt::<UInt64Type>())
        .ok_or_else(|| ArrowError::SchemaError(format!("column '{}' missing or not uint64", name)))
}

fn and_all(masks: Vec<BooleanArray>, len: usize) -> Result<BooleanArray, ArrowError> {
    let mut iter = masks.into_iter();
    let Some(first) = iter.next() else {
        return Ok(BooleanArray::from(vec![true; len]));
    };
    iter.try_fold(first, |acc, mask| and(&acc, &mask))
}

/// Search request ready to be evaluated against Parquet row groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRequest {
    window: Option<Window>,
    duration: Option<DurationBounds>,
    tags: Option<TagMatcher>,
    limit: usize,
}

impl CompiledRequest {
    pub fn compile(req: &SearchRequest) -> Self {
        Self {
            window: Window::from_secs(req.start, req.end),
            duration: DurationBounds::from_millis(req.min_duration_ms, req.max_duration_ms),
            tags: TagMatcher::compile(&req.tags),
            limit: req.limit as usize,
        }
    }

    /// True when the request places no constraint on traces.
    pub fn matches_all(&self) -> bool {
        self.window.is_none() && self.duration.is_none() && self.tags.is_none()
    }

    /// Maximum number of results, 0 for no limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block-level check against the time bounds recorded in `meta`.
    pub fn block_may_match(&self, meta: &BlockMeta) -> bool {
        if self.tags.as_ref().is_some_and(TagMatcher::is_unsatisfiable) {
            return false;
        }
        match self.window {
            Some(w) => meta.overlaps(w.start_secs, w.end_secs),
            None => true,
        }
    }

    /// Row-group check against column statistics. Missing statistics never exclude.
    pub(crate) fn row_group_may_match(&self, rg: &RowGroupMetaData, stats: &StatsColumns) -> bool {
        if let Some(w) = self.window {
            let (min_start, _) = u64_bounds(rg, stats.start);
            let (_, max_end) = u64_bounds(rg, stats.end);
            if min_start.is_some_and(|v| v > w.end) || max_end.is_some_and(|v| v < w.start) {
                return false;
            }
        }
        if let Some(d) = self.duration {
            let (min_dur, max_dur) = u64_bounds(rg, stats.duration);
            if let (Some(want), Some(have)) = (d.min, max_dur) {
                if have < want {
                    return false;
                }
            }
            if let (Some(want), Some(have)) = (d.max, min_dur) {
                if have > want {
                    return false;
                }
            }
        }
        true
    }

    /// Boolean mask of rows in a batch of the three time columns that pass
    /// the window and duration predicates.
    fn time_mask(&self, batch: &RecordBatch) -> Result<BooleanArray, ArrowError> {
        let mut masks = Vec::new();
        if let Some(w) = self.window {
            let start = u64_column(batch, column::START_TIME_UNIX_NANO)?;
            let end = u64_column(batch, column::END_TIME_UNIX_NANO)?;
            masks.push(lt_eq(start, &UInt64Array::new_scalar(w.end))?);
            masks.push(gt_eq(end, &UInt64Array::new_scalar(w.start))?);
        }
        if let Some(d) = self.duration {
            let duration = u64_column(batch, column::DURATION_NANOS)?;
            if let Some(min) = d.min {
                masks.push(gt_eq(duration, &UInt64Array::new_scalar(min))?);
            }
            if let Some(max) = d.max {
                masks.push(lt_eq(duration, &UInt64Array::new_scalar(max))?);
            }
        }
        and_all(masks, batch.num_rows())
    }

    fn tag_mask(matcher: &TagMatcher, batch: &RecordBatch) -> Result<BooleanArray, ArrowError> {
        let cols = ResourceSpansColumns::try_new(batch)
            .map_err(|e| ArrowError::ExternalError(Box::new(e)))?;
        Ok((0..batch.num_rows())
            .map(|row| Some(matcher.matches_row(&cols, row)))
            .collect())
    }

    /// Row filter evaluating the narrow time columns first and the nested
    /// tag column second. `None` when the request has no row predicates.
    pub(crate) fn row_filter(
        self: &Arc<Self>,
        schema: &SchemaDescriptor,
    ) -> std::result::Result<Option<RowFilter>, &'static str> {
        let mut predicates: Vec<Box<dyn ArrowPredicate>> = Vec::new();

        if self.window.is_some() || self.duration.is_some() {
            let mask = ProjectionMask::roots(schema, root_indices(schema, &TIME_COLUMNS)?);
            let request = Arc::clone(self);
            predicates.push(Box::new(ArrowPredicateFn::new(mask, move |batch| {
                request.time_mask(&batch)
            })));
        }

        if self.tags.is_some() {
            let mask = ProjectionMask::roots(
                schema,
                root_indices(schema, &[column::RESOURCE_SPANS])?,
            );
            let request = Arc::clone(self);
            predicates.push(Box::new(ArrowPredicateFn::new(mask, move |batch| {
                match &request.tags {
                    Some(matcher) => Self::tag_mask(matcher, &batch),
                    None => Ok(BooleanArray::from(vec![true; batch.num_rows()])),
                }
            })));
        }

        Ok((!predicates.is_empty()).then(|| RowFilter::new(predicates)))
    }

    /// Root columns a search has to fetch.
    pub(crate) fn fetch_columns(&self) -> Vec<&'static str> {
        let mut names = SUMMARY_COLUMNS.to_vec();
        if self.tags.is_some() {
            names.push(column::RESOURCE_SPANS);
        }
        names
    }
}
