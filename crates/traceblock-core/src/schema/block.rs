use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arrow::datatypes::{DataType, Field, FieldRef, Fields, Schema};

pub const SCHEMA_VERSION_KEY: &str = "traceblock.schema_version";
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Column names of the block body.
///
/// Top-level columns are the ones the search engine reads without touching
/// the nested `rs` column. Nested names are unique within their struct only.
pub mod column {
    // Trace-level columns
    pub const TRACE_ID: &str = "TraceID";
    pub const START_TIME_UNIX_NANO: &str = "StartTimeUnixNano";
    pub const END_TIME_UNIX_NANO: &str = "EndTimeUnixNano";
    pub const DURATION_NANOS: &str = "DurationNanos";
    pub const ROOT_SERVICE_NAME: &str = "RootServiceName";
    pub const ROOT_SPAN_NAME: &str = "RootSpanName";
    pub const RESOURCE_SPANS: &str = "rs";

    // ResourceSpans
    pub const RESOURCE: &str = "Resource";
    pub const ILS: &str = "ils";

    // Resource
    pub const SERVICE_NAME: &str = "ServiceName";
    pub const CLUSTER: &str = "Cluster";
    pub const NAMESPACE: &str = "Namespace";
    pub const POD: &str = "Pod";
    pub const CONTAINER: &str = "Container";
    pub const K8S_CLUSTER_NAME: &str = "K8sClusterName";
    pub const K8S_NAMESPACE_NAME: &str = "K8sNamespaceName";
    pub const K8S_POD_NAME: &str = "K8sPodName";
    pub const K8S_CONTAINER_NAME: &str = "K8sContainerName";

    // ILS
    pub const INSTRUMENTATION_LIBRARY: &str = "InstrumentationLibrary";
    pub const LIBRARY_NAME: &str = "Name";
    pub const LIBRARY_VERSION: &str = "Version";
    pub const SPANS: &str = "Spans";

    // Span
    pub const SPAN_ID: &str = "ID";
    pub const PARENT_SPAN_ID: &str = "ParentSpanID";
    pub const SPAN_NAME: &str = "Name";
    pub const KIND: &str = "Kind";
    pub const START_UNIX_NANOS: &str = "StartUnixNanos";
    pub const END_UNIX_NANOS: &str = "EndUnixNanos";
    pub const STATUS_CODE: &str = "StatusCode";
    pub const STATUS_MESSAGE: &str = "StatusMessage";
    pub const HTTP_METHOD: &str = "HttpMethod";
    pub const HTTP_URL: &str = "HttpUrl";
    pub const HTTP_STATUS_CODE: &str = "HttpStatusCode";

    // Attribute
    pub const ATTRS: &str = "Attrs";
    pub const KEY: &str = "Key";
    pub const VALUE: &str = "Value";

    /// Well-known resource columns, in struct order.
    pub const RESOURCE_LABELS: [&str; 9] = [
        SERVICE_NAME,
        CLUSTER,
        NAMESPACE,
        POD,
        CONTAINER,
        K8S_CLUSTER_NAME,
        K8S_NAMESPACE_NAME,
        K8S_POD_NAME,
        K8S_CONTAINER_NAME,
    ];
}

/// Returns the Arrow schema of a block body.
pub fn block_schema() -> Schema {
    block_schema_arc().as_ref().clone()
}

/// Returns a cached `Arc<Schema>` for the block body.
pub fn block_schema_arc() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    Arc::clone(SCHEMA.get_or_init(|| Arc::new(build_schema())))
}

/// Element field shared by every list column. Lists never hold null entries.
pub(crate) fn list_item(fields: Fields) -> FieldRef {
    Arc::new(Field::new("item", DataType::Struct(fields), false))
}

fn list_of(name: &str, fields: Fields) -> Field {
    Field::new(name, DataType::List(list_item(fields)), false)
}

pub(crate) fn attr_fields() -> Fields {
    Fields::from(vec![
        Field::new(column::KEY, DataType::Utf8, false),
        Field::new(column::VALUE, DataType::Utf8, true),
    ])
}

pub(crate) fn resource_fields() -> Fields {
    let mut fields: Vec<Field> = column::RESOURCE_LABELS
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect();
    fields.push(list_of(column::ATTRS, attr_fields()));
    Fields::from(fields)
}

pub(crate) fn library_fields() -> Fields {
    Fields::from(vec![
        Field::new(column::LIBRARY_NAME, DataType::Utf8, false),
        Field::new(column::LIBRARY_VERSION, DataType::Utf8, false),
    ])
}

pub(crate) fn span_fields() -> Fields {
    Fields::from(vec![
        Field::new(column::SPAN_ID, DataType::Binary, false),
        Field::new(column::PARENT_SPAN_ID, DataType::Binary, false),
        Field::new(column::SPAN_NAME, DataType::Utf8, false),
        Field::new(column::KIND, DataType::Int32, false),
        Field::new(column::START_UNIX_NANOS, DataType::UInt64, false),
        Field::new(column::END_UNIX_NANOS, DataType::UInt64, false),
        Field::new(column::STATUS_CODE, DataType::Int32, false),
        Field::new(column::STATUS_MESSAGE, DataType::Utf8, true),
        Field::new(column::HTTP_METHOD, DataType::Utf8, true),
        Field::new(column::HTTP_URL, DataType::Utf8, true),
        Field::new(column::HTTP_STATUS_CODE, DataType::Int64, true),
        list_of(column::ATTRS, attr_fields()),
    ])
}

pub(crate) fn ils_fields() -> Fields {
    Fields::from(vec![
        Field::new(
            column::INSTRUMENTATION_LIBRARY,
            DataType::Struct(library_fields()),
            false,
        ),
        list_of(column::SPANS, span_fields()),
    ])
}

pub(crate) fn resource_spans_fields() -> Fields {
    Fields::from(vec![
        Field::new(column::RESOURCE, DataType::Struct(resource_fields()), false),
        list_of(column::ILS, ils_fields()),
    ])
}

fn build_schema() -> Schema {
    let fields = vec![
        Field::new(column::TRACE_ID, DataType::Binary, false),
        Field::new(column::START_TIME_UNIX_NANO, DataType::UInt64, false),
        Field::new(column::END_TIME_UNIX_NANO, DataType::UInt64, false),
        Field::new(column::DURATION_NANOS, DataType::UInt64, false),
        Field::new(column::ROOT_SERVICE_NAME, DataType::Utf8, false),
        Field::new(column::ROOT_SPAN_NAME, DataType::Utf8, false),
        list_of(column::RESOURCE_SPANS, resource_spans_fields()),
    ];

    let metadata = HashMap::from([(SCHEMA_VERSION_KEY.to_string(), SCHEMA_VERSION.to_string())]);

    Schema::new_with_metadata(fields, metadata)
}
