pub mod block;

pub use block::{block_schema, block_schema_arc, column, SCHEMA_VERSION, SCHEMA_VERSION_KEY};
pub(crate) use block::{
    attr_fields, ils_fields, library_fields, list_item, resource_fields, resource_spans_fields,
    span_fields,
};
