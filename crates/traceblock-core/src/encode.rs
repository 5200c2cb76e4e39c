//! Trace -> Arrow conversion.
//!
//! Each trace becomes one row. Nested resources, libraries, spans and
//! attributes are flattened into child arrays and stitched back together
//! with list offsets, so no per-row builder state is needed.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, Int32Builder, Int64Builder, ListArray, RecordBatch, StringBuilder,
    StructArray, UInt64Builder,
};
use arrow::buffer::{OffsetBuffer, ScalarBuffer};
use arrow::datatypes::Fields;
use arrow::error::ArrowError;
use thiserror::Error;

use crate::schema::{
    attr_fields, block_schema_arc, ils_fields, library_fields, list_item, resource_fields,
    resource_spans_fields, span_fields,
};
use crate::trace::{Attribute, Ils, Resource, ResourceSpans, Span, Trace};

/// Reasons a trace cannot be written to a block.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("trace id must be 16 bytes, got {len}")]
    InvalidTraceId { len: usize },

    #[error("{scope} attribute with empty key")]
    EmptyAttributeKey { scope: &'static str },

    #[error("nested list exceeds i32 offsets")]
    OffsetOverflow,

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// Encode `traces` into a single record batch using the block schema.
pub fn traces_to_record_batch(traces: &[Trace]) -> Result<RecordBatch, EncodeError> {
    let mut builder = TraceArrowBuilder::with_capacity(traces.len());
    for trace in traces {
        builder.add_trace(trace)?;
    }
    builder.finish()
}

fn offsets(lengths: &[usize]) -> Result<OffsetBuffer<i32>, EncodeError> {
    let mut offsets = Vec::with_capacity(lengths.len() + 1);
    let mut current: i32 = 0;
    offsets.push(current);
    for len in lengths {
        let len = i32::try_from(*len).map_err(|_| EncodeError::OffsetOverflow)?;
        current = current
            .checked_add(len)
            .ok_or(EncodeError::OffsetOverflow)?;
        offsets.push(current);
    }
    Ok(OffsetBuffer::new(ScalarBuffer::from(offsets)))
}

fn list(fields: Fields, lengths: &[usize], values: StructArray) -> Result<ArrayRef, EncodeError> {
    let array = ListArray::try_new(list_item(fields), offsets(lengths)?, Arc::new(values), None)?;
    Ok(Arc::new(array))
}

fn append_opt(builder: &mut StringBuilder, value: Option<&str>) {
    match value {
        Some(v) => builder.append_value(v),
        None => builder.append_null(),
    }
}

#[derive(Default)]
struct AttrColumns {
    lengths: Vec<usize>,
    keys: StringBuilder,
    values: StringBuilder,
}

impl AttrColumns {
    fn add(&mut self, attrs: &[Attribute]) {
        self.lengths.push(attrs.len());
        for attr in attrs {
            self.keys.append_value(&attr.key);
            append_opt(&mut self.values, attr.value.as_deref());
        }
    }

    fn finish(mut self) -> Result<ArrayRef, EncodeError> {
        let values = StructArray::try_new(
            attr_fields(),
            vec![
                Arc::new(self.keys.finish()) as ArrayRef,
                Arc::new(self.values.finish()),
            ],
            None,
        )?;
        list(attr_fields(), &self.lengths, values)
    }
}

#[derive(Default)]
struct SpanColumns {
    id: BinaryBuilder,
    parent_span_id: BinaryBuilder,
    name: StringBuilder,
    kind: Int32Builder,
    start: UInt64Builder,
    end: UInt64Builder,
    status_code: Int32Builder,
    status_message: StringBuilder,
    http_method: StringBuilder,
    http_url: StringBuilder,
    http_status_code: Int64Builder,
    attrs: AttrColumns,
}

impl SpanColumns {
    fn add(&mut self, span: &Span) {
        self.id.append_value(&span.id);
        self.parent_span_id.append_value(&span.parent_span_id);
        self.name.append_value(&span.name);
        self.kind.append_value(span.kind);
        self.start.append_value(span.start_unix_nanos);
        self.end.append_value(span.end_unix_nanos);
        self.status_code.append_value(span.status_code);
        append_opt(&mut self.status_message, span.status_message.as_deref());
        append_opt(&mut self.http_method, span.http_method.as_deref());
        append_opt(&mut self.http_url, span.http_url.as_deref());
        self.http_status_code.append_option(span.http_status_code);
        self.attrs.add(&span.attrs);
    }

    fn finish(mut self) -> Result<StructArray, EncodeError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.id.finish()),
            Arc::new(self.parent_span_id.finish()),
            Arc::new(self.name.finish()),
            Arc::new(self.kind.finish()),
            Arc::new(self.start.finish()),
            Arc::new(self.end.finish()),
            Arc::new(self.status_code.finish()),
            Arc::new(self.status_message.finish()),
            Arc::new(self.http_method.finish()),
            Arc::new(self.http_url.finish()),
            Arc::new(self.http_status_code.finish()),
            self.attrs.finish()?,
        ];
        Ok(StructArray::try_new(span_fields(), columns, None)?)
    }
}

#[derive(Default)]
struct IlsColumns {
    library_name: StringBuilder,
    library_version: StringBuilder,
    span_lengths: Vec<usize>,
    spans: SpanColumns,
}

impl IlsColumns {
    fn add(&mut self, ils: &Ils) {
        self.library_name
            .append_value(&ils.instrumentation_library.name);
        self.library_version
            .append_value(&ils.instrumentation_library.version);
        self.span_lengths.push(ils.spans.len());
        for span in &ils.spans {
            self.spans.add(span);
        }
    }

    fn finish(mut self) -> Result<StructArray, EncodeError> {
        let library = StructArray::try_new(
            library_fields(),
            vec![
                Arc::new(self.library_name.finish()) as ArrayRef,
                Arc::new(self.library_version.finish()),
            ],
            None,
        )?;
        let spans = list(span_fields(), &self.span_lengths, self.spans.finish()?)?;
        Ok(StructArray::try_new(
            ils_fields(),
            vec![Arc::new(library) as ArrayRef, spans],
            None,
        )?)
    }
}

#[derive(Default)]
struct ResourceColumns {
    labels: [StringBuilder; 9],
    attrs: AttrColumns,
}

impl ResourceColumns {
    fn add(&mut self, resource: &Resource) {
        let values = [
            &resource.service_name,
            &resource.cluster,
            &resource.namespace,
            &resource.pod,
            &resource.container,
            &resource.k8s_cluster_name,
            &resource.k8s_namespace_name,
            &resource.k8s_pod_name,
            &resource.k8s_container_name,
        ];
        for (builder, value) in self.labels.iter_mut().zip(values) {
            append_opt(builder, value.as_deref());
        }
        self.attrs.add(&resource.attrs);
    }

    fn finish(self) -> Result<StructArray, EncodeError> {
        let mut columns: Vec<ArrayRef> = self
            .labels
            .into_iter()
            .map(|mut builder| Arc::new(builder.finish()) as ArrayRef)
            .collect();
        columns.push(self.attrs.finish()?);
        Ok(StructArray::try_new(resource_fields(), columns, None)?)
    }
}

struct TraceArrowBuilder {
    trace_id: BinaryBuilder,
    start: UInt64Builder,
    end: UInt64Builder,
    duration: UInt64Builder,
    root_service_name: StringBuilder,
    root_span_name: StringBuilder,
    rs_lengths: Vec<usize>,
    resources: ResourceColumns,
    ils_lengths: Vec<usize>,
    ils: IlsColumns,
}

impl TraceArrowBuilder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            trace_id: BinaryBuilder::with_capacity(capacity, capacity * 16),
            start: UInt64Builder::with_capacity(capacity),
            end: UInt64Builder::with_capacity(capacity),
            duration: UInt64Builder::with_capacity(capacity),
            root_service_name: StringBuilder::with_capacity(capacity, capacity * 16),
            root_span_name: StringBuilder::with_capacity(capacity, capacity * 16),
            rs_lengths: Vec::with_capacity(capacity),
            resources: ResourceColumns::default(),
            ils_lengths: Vec::new(),
            ils: IlsColumns::default(),
        }
    }

    fn add_trace(&mut self, trace: &Trace) -> Result<(), EncodeError> {
        trace.validate()?;

        self.trace_id.append_value(&trace.trace_id);
        self.start.append_value(trace.start_time_unix_nano);
        self.end.append_value(trace.end_time_unix_nano);
        self.duration.append_value(trace.duration_nanos);
        self.root_service_name
            .append_value(&trace.root_service_name);
        self.root_span_name.append_value(&trace.root_span_name);

        self.rs_lengths.push(trace.resource_spans.len());
        for rs in &trace.resource_spans {
            self.add_resource_spans(rs);
        }
        Ok(())
    }

    fn add_resource_spans(&mut self, rs: &ResourceSpans) {
        self.resources.add(&rs.resource);
        self.ils_lengths
            .push(rs.instrumentation_library_spans.len());
        for ils in &rs.instrumentation_library_spans {
            self.ils.add(ils);
        }
    }

    fn finish(mut self) -> Result<RecordBatch, EncodeError> {
        let resources = self.resources.finish()?;
        let ils = list(ils_fields(), &self.ils_lengths, self.ils.finish()?)?;
        let rs_values = StructArray::try_new(
            resource_spans_fields(),
            vec![Arc::new(resources) as ArrayRef, ils],
            None,
        )?;
        let rs = list(resource_spans_fields(), &self.rs_lengths, rs_values)?;

        let batch = RecordBatch::try_new(
            block_schema_arc(),
            vec![
                Arc::new(self.trace_id.finish()),
                Arc::new(self.start.finish()),
                Arc::new(self.end.finish()),
                Arc::new(self.duration.finish()),
                Arc::new(self.root_service_name.finish()),
                Arc::new(self.root_span_name.finish()),
                rs,
            ],
        )?;
        Ok(batch)
    }
}
