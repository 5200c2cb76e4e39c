//! Storage seam of the block engine.
//!
//! A block lives under a key path `<tenant>/<block_id>/` and consists of a
//! small set of named objects. Writers only ever create whole objects or
//! append to one, readers fetch whole objects or byte ranges.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

mod buffered;
mod operator;

pub use buffered::{BufferedAppendWriter, DEFAULT_APPEND_BUFFER_BYTES};
pub use operator::OpendalBackend;

/// Name of the columnar body object.
pub const DATA_FILE_NAME: &str = "data.parquet";
/// Name of the block metadata object.
pub const META_NAME: &str = "meta.json";

/// Name of bloom shard `shard`.
pub fn bloom_name(shard: usize) -> String {
    format!("bloom-{}", shard)
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Opendal(#[from] opendal::Error),

    /// The object ends before the requested range does.
    #[error("short read on {path}: wanted {wanted} bytes at {offset}, got {got}")]
    ShortRead {
        path: String,
        offset: u64,
        wanted: u64,
        got: u64,
    },
}

/// Location of a block's objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn for_block(tenant_id: &str, block_id: Uuid) -> Self {
        Self(vec![tenant_id.to_string(), block_id.to_string()])
    }

    /// Full object path of `name` under this key path.
    pub fn object(&self, name: &str) -> String {
        let mut parts: Vec<&str> = self.0.iter().map(String::as_str).collect();
        parts.push(name);
        parts.join("/")
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[async_trait]
pub trait RawReader: Send + Sync {
    async fn read(&self, name: &str, keypath: &KeyPath) -> Result<Bytes, BackendError>;

    async fn read_range(
        &self,
        name: &str,
        keypath: &KeyPath,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, BackendError>;

    async fn size(&self, name: &str, keypath: &KeyPath) -> Result<u64, BackendError>;
}

#[async_trait]
pub trait RawWriter: Send + Sync {
    /// Create or replace a whole object.
    async fn write(&self, name: &str, keypath: &KeyPath, data: Bytes) -> Result<(), BackendError>;

    /// Open a sequential writer for a new object.
    async fn append(
        &self,
        name: &str,
        keypath: &KeyPath,
    ) -> Result<Box<dyn AppendWriter>, BackendError>;
}

/// Strictly sequential writer for one object. The object becomes visible
/// once `close` succeeds.
#[async_trait]
pub trait AppendWriter: Send {
    async fn append(&mut self, data: Bytes) -> Result<(), BackendError>;

    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Wraps the raw append writer of the data object, e.g. to coalesce small
/// appends. The `usize` is the buffer size in bytes.
pub type BufferFactory = fn(Box<dyn AppendWriter>, usize) -> Box<dyn AppendWriter>;

/// Factory that hands back the raw writer untouched.
pub fn unbuffered(inner: Box<dyn AppendWriter>, _size: usize) -> Box<dyn AppendWriter> {
    inner
}
