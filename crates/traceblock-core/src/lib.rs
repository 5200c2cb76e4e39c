// traceblock-core - Platform-agnostic core logic
//
// This crate contains the PURE pieces of the block engine: the trace data
// model, the well-known label vocabulary, the Arrow schema for a block body
// and the trace <-> Arrow conversions. No I/O, no async, no runtime.

pub mod decode;
pub mod encode;
pub mod labels;
pub mod schema;
pub mod search;
pub mod trace;
pub mod trace_id;

pub use decode::{record_batch_to_traces, DecodeError, TraceColumns};
pub use encode::{traces_to_record_batch, EncodeError};
pub use labels::WellKnownLabel;
pub use schema::{block_schema, block_schema_arc};
pub use search::{SearchMetrics, SearchRequest, SearchResponse, TraceSearchMetadata};
pub use trace::{
    Attribute, Ils, InstrumentationLibrary, Resource, ResourceSpans, Span, StatusCode, Trace,
    TRACE_ID_LEN,
};
pub use trace_id::{hex_to_trace_id, trace_id_to_hex};
