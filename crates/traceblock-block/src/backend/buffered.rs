use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::{AppendWriter, BackendError};

/// Default coalescing threshold. Object stores reject multipart parts below 5 MiB.
pub const DEFAULT_APPEND_BUFFER_BYTES: usize = 5 * 1024 * 1024;

/// Coalesces appends until at least `threshold` bytes are pending.
pub struct BufferedAppendWriter {
    inner: Box<dyn AppendWriter>,
    buf: BytesMut,
    threshold: usize,
}

impl BufferedAppendWriter {
    pub fn new(inner: Box<dyn AppendWriter>, threshold: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            threshold,
        }
    }

    /// [`BufferFactory`](super::BufferFactory) form of [`BufferedAppendWriter::new`].
    pub fn boxed(inner: Box<dyn AppendWriter>, threshold: usize) -> Box<dyn AppendWriter> {
        Box::new(Self::new(inner, threshold))
    }

    async fn drain(&mut self) -> Result<(), BackendError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let pending: Bytes = self.buf.split().freeze();
        self.inner.append(pending).await
    }
}

#[async_trait]
impl AppendWriter for BufferedAppendWriter {
    async fn append(&mut self, data: Bytes) -> Result<(), BackendError> {
        if self.buf.is_empty() && data.len() >= self.threshold {
            return self.inner.append(data).await;
        }

        self.buf.extend_from_slice(&data);
        if self.buf.len() >= self.threshold {
            self.drain().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.drain().await?;
        self.inner.close().await
    }
}
