// traceblock - columnar trace blocks with predicate search
//
// Facade over the workspace crates:
// - traceblock-core:   trace model, labels, Arrow schema and conversions
// - traceblock-config: BlockConfig, SearchOptions and engine configuration
// - traceblock-block:  streaming writer, block reader and search engine

mod init;

pub use init::{init_tracing, open_backend};

pub use traceblock_block::{
    backend, bloom, error, meta, reader, search, streaming, BackendBlock, BlockError, BlockMeta,
    BufferedAppendWriter, CancellationToken, Encoding, ErrorCode, OpendalBackend, RawReader,
    RawWriter, StreamingBlock, VERSION_STRING,
};
pub use traceblock_config::{
    BlockConfig, EngineConfig, LogFormat, LoggingConfig, SearchOptions, StorageBackend,
    StorageConfig,
};
pub use traceblock_core::{
    hex_to_trace_id, labels, trace_id_to_hex, Attribute, Ils, InstrumentationLibrary, Resource,
    ResourceSpans, SearchMetrics, SearchRequest, SearchResponse, Span, StatusCode, Trace,
    TraceSearchMetadata, TRACE_ID_LEN,
};
