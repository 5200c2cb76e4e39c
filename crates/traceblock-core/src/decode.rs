//! Arrow -> trace access.
//!
//! [`TraceColumns`] exposes the nested arrays of a block batch with typed
//! accessors so the search engine can walk resources and spans in place.
//! [`record_batch_to_traces`] builds owned [`Trace`] values on top of it.

use std::ops::Range;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, Int32Array, Int64Array, ListArray, RecordBatch,
    StringArray, StructArray, UInt64Array,
};
use arrow::datatypes::{Int32Type, Int64Type, UInt64Type};
use thiserror::Error;

use crate::schema::column;
use crate::trace::{
    Attribute, Ils, InstrumentationLibrary, Resource, ResourceSpans, Span, Trace,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("column '{column}' is not {expected}")]
    ColumnType {
        column: &'static str,
        expected: &'static str,
    },

    #[error("row {row}: empty trace id")]
    EmptyTraceId { row: usize },

    #[error("row {row}: null value in required column '{column}'")]
    NullValue { row: usize, column: &'static str },
}

impl DecodeError {
    /// True when the batch itself does not have the block layout, as opposed
    /// to a single malformed record.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::MissingColumn(_) | Self::ColumnType { .. })
    }
}

type Result<T> = std::result::Result<T, DecodeError>;

fn batch_column<'a>(batch: &'a RecordBatch, name: &'static str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or(DecodeError::MissingColumn(name))
}

fn struct_column<'a>(array: &'a StructArray, name: &'static str) -> Result<&'a ArrayRef> {
    array
        .column_by_name(name)
        .ok_or(DecodeError::MissingColumn(name))
}

fn as_string<'a>(array: &'a ArrayRef, name: &'static str) -> Result<&'a StringArray> {
    array.as_string_opt::<i32>().ok_or(DecodeError::ColumnType {
        column: name,
        expected: "utf8",
    })
}

fn as_binary<'a>(array: &'a ArrayRef, name: &'static str) -> Result<&'a BinaryArray> {
    array.as_binary_opt::<i32>().ok_or(DecodeError::ColumnType {
        column: name,
        expected: "binary",
    })
}

fn as_u64<'a>(array: &'a ArrayRef, name: &'static str) -> Result<&'a UInt64Array> {
    array
        .as_primitive_opt::<UInt64Type>()
        .ok_or(DecodeError::ColumnType {
            column: name,
            expected: "uint64",
        })
}

fn as_i32<'a>(array: &'a ArrayRef, name: &'static str) -> Result<&'a Int32Array> {
    array
        .as_primitive_opt::<Int32Type>()
        .ok_or(DecodeError::ColumnType {
            column: name,
            expected: "int32",
        })
}

fn as_i64<'a>(array: &'a ArrayRef, name: &'static str) -> Result<&'a Int64Array> {
    array
        .as_primitive_opt::<Int64Type>()
        .ok_or(DecodeError::ColumnType {
            column: name,
            expected: "int64",
        })
}

fn as_list<'a>(array: &'a ArrayRef, name: &'static str) -> Result<&'a ListArray> {
    array.as_list_opt::<i32>().ok_or(DecodeError::ColumnType {
        column: name,
        expected: "list",
    })
}

fn as_struct<'a>(array: &'a ArrayRef, name: &'static str) -> Result<&'a StructArray> {
    array.as_struct_opt().ok_or(DecodeError::ColumnType {
        column: name,
        expected: "struct",
    })
}

fn list_range(list: &ListArray, index: usize) -> Range<usize> {
    let offsets = list.value_offsets();
    offsets[index] as usize..offsets[index + 1] as usize
}

fn opt_string(array: &StringArray, index: usize) -> Option<&str> {
    if array.is_null(index) {
        None
    } else {
        Some(array.value(index))
    }
}

/// Key/value attribute list.
pub struct AttrColumns<'a> {
    list: &'a ListArray,
    keys: &'a StringArray,
    values: &'a StringArray,
}

impl<'a> AttrColumns<'a> {
    fn try_new(owner: &'a StructArray) -> Result<Self> {
        let list = as_list(struct_column(owner, column::ATTRS)?, column::ATTRS)?;
        let entries = as_struct(list.values(), column::ATTRS)?;
        Ok(Self {
            list,
            keys: as_string(struct_column(entries, column::KEY)?, column::KEY)?,
            values: as_string(struct_column(entries, column::VALUE)?, column::VALUE)?,
        })
    }

    /// Attribute value of the first entry with `key` for the owner at `owner_index`.
    ///
    /// The outer `Option` is `None` when the key is absent; the inner one is
    /// `None` when the key is present without a value.
    pub fn first(&self, owner_index: usize, key: &str) -> Option<Option<&'a str>> {
        list_range(self.list, owner_index)
            .find(|&i| self.keys.value(i) == key)
            .map(|i| opt_string(self.values, i))
    }

    fn collect(&self, owner_index: usize) -> Vec<Attribute> {
        list_range(self.list, owner_index)
            .map(|i| Attribute {
                key: self.keys.value(i).to_string(),
                value: opt_string(self.values, i).map(str::to_string),
            })
            .collect()
    }
}

/// Flattened span columns of a batch.
pub struct SpanColumns<'a> {
    pub id: &'a BinaryArray,
    pub parent_span_id: &'a BinaryArray,
    pub name: &'a StringArray,
    pub kind: &'a Int32Array,
    pub start: &'a UInt64Array,
    pub end: &'a UInt64Array,
    pub status_code: &'a Int32Array,
    pub status_message: &'a StringArray,
    pub http_method: &'a StringArray,
    pub http_url: &'a StringArray,
    pub http_status_code: &'a Int64Array,
    pub attrs: AttrColumns<'a>,
}

impl<'a> SpanColumns<'a> {
    fn try_new(spans: &'a StructArray) -> Result<Self> {
        Ok(Self {
            id: as_binary(struct_column(spans, column::SPAN_ID)?, column::SPAN_ID)?,
            parent_span_id: as_binary(
                struct_column(spans, column::PARENT_SPAN_ID)?,
                column::PARENT_SPAN_ID,
            )?,
            name: as_string(struct_column(spans, column::SPAN_NAME)?, column::SPAN_NAME)?,
            kind: as_i32(struct_column(spans, column::KIND)?, column::KIND)?,
            start: as_u64(
                struct_column(spans, column::START_UNIX_NANOS)?,
                column::START_UNIX_NANOS,
            )?,
            end: as_u64(
                struct_column(spans, column::END_UNIX_NANOS)?,
                column::END_UNIX_NANOS,
            )?,
            status_code: as_i32(
                struct_column(spans, column::STATUS_CODE)?,
                column::STATUS_CODE,
            )?,
            status_message: as_string(
                struct_column(spans, column::STATUS_MESSAGE)?,
                column::STATUS_MESSAGE,
            )?,
            http_method: as_string(
                struct_column(spans, column::HTTP_METHOD)?,
                column::HTTP_METHOD,
            )?,
            http_url: as_string(struct_column(spans, column::HTTP_URL)?, column::HTTP_URL)?,
            http_status_code: as_i64(
                struct_column(spans, column::HTTP_STATUS_CODE)?,
                column::HTTP_STATUS_CODE,
            )?,
            attrs: AttrColumns::try_new(spans)?,
        })
    }

    pub fn http_method(&self, span: usize) -> Option<&'a str> {
        opt_string(self.http_method, span)
    }

    pub fn http_url(&self, span: usize) -> Option<&'a str> {
        opt_string(self.http_url, span)
    }

    pub fn http_status_code(&self, span: usize) -> Option<i64> {
        if self.http_status_code.is_null(span) {
            None
        } else {
            Some(self.http_status_code.value(span))
        }
    }

    fn to_span(&self, i: usize) -> Span {
        Span {
            id: self.id.value(i).to_vec(),
            parent_span_id: self.parent_span_id.value(i).to_vec(),
            name: self.name.value(i).to_string(),
            kind: self.kind.value(i),
            start_unix_nanos: self.start.value(i),
            end_unix_nanos: self.end.value(i),
            status_code: self.status_code.value(i),
            status_message: opt_string(self.status_message, i).map(str::to_string),
            http_method: self.http_method(i).map(str::to_string),
            http_url: self.http_url(i).map(str::to_string),
            http_status_code: self.http_status_code(i),
            attrs: self.attrs.collect(i),
        }
    }
}

/// Flattened resource columns of a batch.
pub struct ResourceColumns<'a> {
    /// Well-known labels in [`column::RESOURCE_LABELS`] order.
    pub labels: [&'a StringArray; 9],
    pub attrs: AttrColumns<'a>,
}

impl<'a> ResourceColumns<'a> {
    fn try_new(resources: &'a StructArray) -> Result<Self> {
        let mut labels = Vec::with_capacity(column::RESOURCE_LABELS.len());
        for name in column::RESOURCE_LABELS {
            labels.push(as_string(struct_column(resources, name)?, name)?);
        }
        let labels: [&'a StringArray; 9] =
            labels.try_into().map_err(|_| DecodeError::ColumnType {
                column: column::RESOURCE,
                expected: "resource struct",
            })?;
        Ok(Self {
            labels,
            attrs: AttrColumns::try_new(resources)?,
        })
    }

    /// Value of the well-known label at `label_index` for `resource`.
    pub fn label(&self, label_index: usize, resource: usize) -> Option<&'a str> {
        opt_string(self.labels[label_index], resource)
    }

    fn to_resource(&self, i: usize) -> Resource {
        let label = |idx: usize| self.label(idx, i).map(str::to_string);
        Resource {
            service_name: label(0),
            cluster: label(1),
            namespace: label(2),
            pod: label(3),
            container: label(4),
            k8s_cluster_name: label(5),
            k8s_namespace_name: label(6),
            k8s_pod_name: label(7),
            k8s_container_name: label(8),
            attrs: self.attrs.collect(i),
        }
    }
}

/// Typed view over the nested `rs` column.
pub struct ResourceSpansColumns<'a> {
    rs: &'a ListArray,
    pub resources: ResourceColumns<'a>,
    ils: &'a ListArray,
    library_name: &'a StringArray,
    library_version: &'a StringArray,
    spans_list: &'a ListArray,
    pub spans: SpanColumns<'a>,
}

impl<'a> ResourceSpansColumns<'a> {
    pub fn try_new(batch: &'a RecordBatch) -> Result<Self> {
        let rs = as_list(
            batch_column(batch, column::RESOURCE_SPANS)?,
            column::RESOURCE_SPANS,
        )?;
        let rs_values = as_struct(rs.values(), column::RESOURCE_SPANS)?;
        let resources = as_struct(struct_column(rs_values, column::RESOURCE)?, column::RESOURCE)?;
        let ils = as_list(struct_column(rs_values, column::ILS)?, column::ILS)?;
        let ils_values = as_struct(ils.values(), column::ILS)?;
        let library = as_struct(
            struct_column(ils_values, column::INSTRUMENTATION_LIBRARY)?,
            column::INSTRUMENTATION_LIBRARY,
        )?;
        let spans_list = as_list(struct_column(ils_values, column::SPANS)?, column::SPANS)?;
        let spans = as_struct(spans_list.values(), column::SPANS)?;

        Ok(Self {
            rs,
            resources: ResourceColumns::try_new(resources)?,
            ils,
            library_name: as_string(
                struct_column(library, column::LIBRARY_NAME)?,
                column::LIBRARY_NAME,
            )?,
            library_version: as_string(
                struct_column(library, column::LIBRARY_VERSION)?,
                column::LIBRARY_VERSION,
            )?,
            spans_list,
            spans: SpanColumns::try_new(spans)?,
        })
    }

    /// Resource indices belonging to trace `row`.
    pub fn resources_of(&self, row: usize) -> Range<usize> {
        list_range(self.rs, row)
    }

    /// Span indices belonging to `resource`, across all of its libraries.
    pub fn spans_of(&self, resource: usize) -> Range<usize> {
        let libraries = list_range(self.ils, resource);
        if libraries.is_empty() {
            return 0..0;
        }
        let first = list_range(self.spans_list, libraries.start);
        let last = list_range(self.spans_list, libraries.end - 1);
        first.start..last.end
    }

    fn to_resource_spans(&self, resource: usize) -> ResourceSpans {
        let instrumentation_library_spans = list_range(self.ils, resource)
            .map(|lib| Ils {
                instrumentation_library: InstrumentationLibrary {
                    name: self.library_name.value(lib).to_string(),
                    version: self.library_version.value(lib).to_string(),
                },
                spans: list_range(self.spans_list, lib)
                    .map(|span| self.spans.to_span(span))
                    .collect(),
            })
            .collect();

        ResourceSpans {
            resource: self.resources.to_resource(resource),
            instrumentation_library_spans,
        }
    }
}

/// Trace-level summary columns.
pub struct TraceColumns<'a> {
    pub trace_id: &'a BinaryArray,
    pub start: &'a UInt64Array,
    pub end: &'a UInt64Array,
    pub duration: &'a UInt64Array,
    pub root_service_name: &'a StringArray,
    pub root_span_name: &'a StringArray,
}

impl<'a> TraceColumns<'a> {
    pub fn try_new(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            trace_id: as_binary(batch_column(batch, column::TRACE_ID)?, column::TRACE_ID)?,
            start: as_u64(
                batch_column(batch, column::START_TIME_UNIX_NANO)?,
                column::START_TIME_UNIX_NANO,
            )?,
            end: as_u64(
                batch_column(batch, column::END_TIME_UNIX_NANO)?,
                column::END_TIME_UNIX_NANO,
            )?,
            duration: as_u64(
                batch_column(batch, column::DURATION_NANOS)?,
                column::DURATION_NANOS,
            )?,
            root_service_name: as_string(
                batch_column(batch, column::ROOT_SERVICE_NAME)?,
                column::ROOT_SERVICE_NAME,
            )?,
            root_span_name: as_string(
                batch_column(batch, column::ROOT_SPAN_NAME)?,
                column::ROOT_SPAN_NAME,
            )?,
        })
    }

    /// Checks the per-record invariants of `row`.
    pub fn check_row(&self, row: usize) -> Result<()> {
        if self.trace_id.is_null(row) {
            return Err(DecodeError::NullValue {
                row,
                column: column::TRACE_ID,
            });
        }
        if self.trace_id.value(row).is_empty() {
            return Err(DecodeError::EmptyTraceId { row });
        }
        if self.root_service_name.is_null(row) {
            return Err(DecodeError::NullValue {
                row,
                column: column::ROOT_SERVICE_NAME,
            });
        }
        if self.root_span_name.is_null(row) {
            return Err(DecodeError::NullValue {
                row,
                column: column::ROOT_SPAN_NAME,
            });
        }
        Ok(())
    }
}

/// Decode every row of `batch` into an owned [`Trace`].
pub fn record_batch_to_traces(batch: &RecordBatch) -> Result<Vec<Trace>> {
    let traces = TraceColumns::try_new(batch)?;
    let nested = ResourceSpansColumns::try_new(batch)?;

    (0..batch.num_rows())
        .map(|row| {
            traces.check_row(row)?;
            Ok(Trace {
                trace_id: traces.trace_id.value(row).to_vec(),
                start_time_unix_nano: traces.start.value(row),
                end_time_unix_nano: traces.end.value(row),
                duration_nanos: traces.duration.value(row),
                root_service_name: traces.root_service_name.value(row).to_string(),
                root_span_name: traces.root_span_name.value(row).to_string(),
                resource_spans: nested
                    .resources_of(row)
                    .map(|resource| nested.to_resource_spans(resource))
                    .collect(),
            })
        })
        .collect()
}
