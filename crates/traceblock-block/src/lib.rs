// traceblock-block - Block lifecycle and search
//
// Writes traces into immutable columnar blocks on an object-store backend
// and evaluates search predicates against a single finished block.
//
// A block is `<tenant>/<block_id>/` holding:
// - data.parquet: one row per trace, one row group per flush
// - bloom-<n>:    sharded bloom index over trace IDs
// - meta.json:    BlockMeta, written last

pub mod backend;
pub mod bloom;
mod encoding;
pub mod error;
mod fetch;
pub mod meta;
pub mod reader;
pub mod search;
pub mod streaming;

pub use backend::{
    AppendWriter, BackendError, BufferFactory, BufferedAppendWriter, KeyPath, OpendalBackend,
    RawReader, RawWriter,
};
pub use bloom::{shard_key_for_trace_id, BloomShard, ShardedBloom};
pub use error::{BlockError, ErrorCode, Result};
pub use meta::{BlockMeta, Encoding, VERSION_STRING};
pub use reader::BackendBlock;
pub use search::CompiledRequest;
pub use streaming::StreamingBlock;

// Re-export so callers can cancel without naming tokio-util themselves.
pub use tokio_util::sync::CancellationToken;
