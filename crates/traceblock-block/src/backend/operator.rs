//! `RawReader`/`RawWriter` over an OpenDAL operator.

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use opendal::{ErrorKind, Operator};
use traceblock_config::{StorageBackend, StorageConfig};

use super::{AppendWriter, BackendError, KeyPath, RawReader, RawWriter};

#[derive(Debug, Clone)]
pub struct OpendalBackend {
    operator: Operator,
}

impl OpendalBackend {
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }

    /// Build the operator described by the storage section of the config.
    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let operator = match config.backend {
            #[cfg(feature = "services-fs")]
            StorageBackend::Fs => {
                let fs = config.fs.clone().unwrap_or_default();
                let builder = opendal::services::Fs::default().root(&fs.path);
                Operator::new(builder)
                    .with_context(|| format!("Failed to create filesystem operator at {}", fs.path))?
                    .finish()
            }
            #[cfg(feature = "services-memory")]
            StorageBackend::Memory => {
                Operator::new(opendal::services::Memory::default())
                    .context("Failed to create memory operator")?
                    .finish()
            }
            #[allow(unreachable_patterns)]
            other => anyhow::bail!("Storage backend '{}' not compiled in", other),
        };

        Ok(Self::new(operator))
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// A range past the end of the object fails as a generic read error in
    /// some services, so the object length decides whether it was truncated.
    async fn range_error(
        &self,
        path: &str,
        offset: u64,
        len: u64,
        err: opendal::Error,
    ) -> BackendError {
        match self.operator.stat(path).await {
            Ok(meta) if meta.content_length() < offset + len => BackendError::ShortRead {
                path: path.to_string(),
                offset,
                wanted: len,
                got: meta.content_length().saturating_sub(offset),
            },
            _ => map_err(path, err),
        }
    }
}

fn map_err(path: &str, err: opendal::Error) -> BackendError {
    if err.kind() == ErrorKind::NotFound {
        BackendError::NotFound(path.to_string())
    } else {
        BackendError::Opendal(err)
    }
}

#[async_trait]
impl RawReader for OpendalBackend {
    async fn read(&self, name: &str, keypath: &KeyPath) -> Result<Bytes, BackendError> {
        let path = keypath.object(name);
        let buffer = self
            .operator
            .read(&path)
            .await
            .map_err(|e| map_err(&path, e))?;
        Ok(buffer.to_bytes())
    }

    async fn read_range(
        &self,
        name: &str,
        keypath: &KeyPath,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, BackendError> {
        let path = keypath.object(name);
        let buffer = match self.operator.read_with(&path).range(offset..offset + len).await {
            Ok(buffer) => buffer,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(map_err(&path, err)),
            Err(err) => return Err(self.range_error(&path, offset, len, err).await),
        };
        let bytes = buffer.to_bytes();
        if bytes.len() as u64 != len {
            return Err(BackendError::ShortRead {
                path,
                offset,
                wanted: len,
                got: bytes.len() as u64,
            });
        }
        Ok(bytes)
    }

    async fn size(&self, name: &str, keypath: &KeyPath) -> Result<u64, BackendError> {
        let path = keypath.object(name);
        let meta = self
            .operator
            .stat(&path)
            .await
            .map_err(|e| map_err(&path, e))?;
        Ok(meta.content_length())
    }
}

#[async_trait]
impl RawWriter for OpendalBackend {
    async fn write(&self, name: &str, keypath: &KeyPath, data: Bytes) -> Result<(), BackendError> {
        let path = keypath.object(name);
        self.operator
            .write(&path, data)
            .await
            .map_err(|e| map_err(&path, e))?;
        Ok(())
    }

    async fn append(
        &self,
        name: &str,
        keypath: &KeyPath,
    ) -> Result<Box<dyn AppendWriter>, BackendError> {
        let path = keypath.object(name);
        let writer = self
            .operator
            .writer(&path)
            .await
            .map_err(|e| map_err(&path, e))?;
        Ok(Box::new(OpendalAppendWriter { path, writer }))
    }
}

struct OpendalAppendWriter {
    path: String,
    writer: opendal::Writer,
}

#[async_trait]
impl AppendWriter for OpendalAppendWriter {
    async fn append(&mut self, data: Bytes) -> Result<(), BackendError> {
        self.writer
            .write(data)
            .await
            .map_err(|e| map_err(&self.path, e))
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.writer
            .close()
            .await
            .map_err(|e| map_err(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use traceblock_config::FsConfig;
    use uuid::Uuid;

    fn fs_backend(dir: &tempfile::TempDir) -> OpendalBackend {
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig {
                path: dir.path().to_string_lossy().into_owned(),
            }),
        };
        OpendalBackend::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read_range() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let keypath = KeyPath::for_block("tenant", Uuid::new_v4());

        backend
            .write("obj", &keypath, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        assert_eq!(backend.size("obj", &keypath).await.unwrap(), 10);
        let range = backend.read_range("obj", &keypath, 2, 3).await.unwrap();
        assert_eq!(&range[..], b"234");
    }

    #[tokio::test]
    async fn test_append_writer_concatenates() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let keypath = KeyPath::for_block("tenant", Uuid::new_v4());

        let mut writer = backend.append("data", &keypath).await.unwrap();
        writer.append(Bytes::from_static(b"abc")).await.unwrap();
        writer.append(Bytes::from_static(b"def")).await.unwrap();
        writer.close().await.unwrap();

        let all = backend.read("data", &keypath).await.unwrap();
        assert_eq!(&all[..], b"abcdef");
    }

    #[tokio::test]
    async fn test_range_past_end_is_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let keypath = KeyPath::for_block("tenant", Uuid::new_v4());

        backend
            .write("obj", &keypath, Bytes::from_static(b"PAR1"))
            .await
            .unwrap();

        let err = backend.read_range("obj", &keypath, 2, 8).await.unwrap_err();
        match err {
            BackendError::ShortRead {
                offset, wanted, got, ..
            } => assert_eq!((offset, wanted, got), (2, 8, 2)),
            other => panic!("expected short read, got {:?}", other),
        }

        let err = backend.read_range("obj", &keypath, 100, 8).await.unwrap_err();
        assert!(matches!(err, BackendError::ShortRead { got: 0, .. }));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fs_backend(&dir);
        let keypath = KeyPath::for_block("tenant", Uuid::new_v4());

        let err = backend.read("meta.json", &keypath).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }
}
