use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::errors::{Error, KeyError, Result};
use super::{Key, ObjectBody, ObjectStore, ObjectWriter};

/// Directory under the root holding objects that are still being written.
const PARTIAL_DIR: &str = ".partial";

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone, Deserialize)]
pub struct FilesystemConfig {
    root: PathBuf,
}

impl FilesystemConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn new_objects(&self) -> Result<Filesystem> {
        Filesystem::new(&self.root).await
    }
}

/// Stores each object as a file at `<root>/<key>`.
///
/// Writers stage into a private file under `<root>/.partial` and `rename` it into place on
/// commit, so readers never observe a partially written object.
#[derive(Clone, Debug)]
pub struct Filesystem {
    root: PathBuf,
}

impl Filesystem {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(PARTIAL_DIR)).await?;
        Ok(Self { root })
    }

    fn path(&self, key: &Key) -> Result<PathBuf> {
        if key.first_segment() == Some(PARTIAL_DIR) {
            return Err(KeyError::Reserved(key.to_string()).into());
        }
        Ok(self.root.join(key.as_path()))
    }

    fn partial_path(&self) -> PathBuf {
        self.root.join(PARTIAL_DIR).join(Uuid::new_v4().to_string())
    }

    async fn rename_into_place(partial: &Path, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(partial, target).await?;
        Ok(())
    }
}

fn not_found(key: &Key) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |e| match e.kind() {
        ErrorKind::NotFound => Error::NotFound(key.to_string()),
        _ => Error::IoError(e),
    }
}

#[async_trait]
impl ObjectStore for Filesystem {
    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let file = tokio::fs::File::open(self.path(key)?)
            .await
            .map_err(not_found(key))?;
        Ok(ReaderStream::with_capacity(file, READ_BUFFER_SIZE)
            .map_err(Error::from)
            .boxed())
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        match tokio::fs::metadata(self.path(key)?).await {
            Ok(md) => Ok(md.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &Key, bytes: Bytes) -> Result<()> {
        let target = self.path(key)?;
        let partial = self.partial_path();
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Self::rename_into_place(&partial, &target).await
        }
        .await;
        if written.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        written
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        match tokio::fs::remove_file(self.path(key)?).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn delete_prefix(&self, prefix: &Key) -> Result<()> {
        match tokio::fs::remove_dir_all(self.path(prefix)?).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn writer(&self, key: &Key) -> Result<Box<dyn ObjectWriter>> {
        let target = self.path(key)?;
        let partial = self.partial_path();
        let file = tokio::fs::File::create(&partial).await?;
        Ok(Box::new(FilesystemWriter {
            file: Some(file),
            partial,
            target,
        }))
    }
}

struct FilesystemWriter {
    /// `None` once committed or discarded.
    file: Option<tokio::fs::File>,
    partial: PathBuf,
    target: PathBuf,
}

#[async_trait]
impl ObjectWriter for FilesystemWriter {
    async fn write(&mut self, bytes: Bytes) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::WriterFinished(self.target.display().to_string()))?;
        file.write_all(&bytes).await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::WriterFinished(self.target.display().to_string()))?;
        let synced = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = synced {
            let _ = tokio::fs::remove_file(&self.partial).await;
            return Err(e.into());
        }
        if let Err(e) = Filesystem::rename_into_place(&self.partial, &self.target).await {
            let _ = tokio::fs::remove_file(&self.partial).await;
            return Err(e);
        }
        Ok(())
    }

    async fn discard(mut self: Box<Self>) -> Result<()> {
        drop(self.file.take());
        match tokio::fs::remove_file(&self.partial).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Drop for FilesystemWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.partial) {
                tracing::warn!(path = %self.partial.display(), error = %e, "failed to remove partial object");
            }
        }
    }
}
