use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use once_cell::sync::Lazy;
use regex::Regex;

mod config;
pub use config::Config;
mod errors;
pub use errors::{Error, KeyError, Result};
pub(crate) mod fs;
pub use fs::{Filesystem, FilesystemConfig};
pub(crate) mod s3;
pub use s3::S3Config;
pub use s3::S3;

/// A wrapper around [`std::path::PathBuf`] that rejects unsavory key names.
///
/// The following rules applied during the [`TryFrom<PathBuf>`] implementation:
///
/// * paths must not start with `/`
/// * paths are delimited by `/`
/// * paths are normalized (`//` are replaced with `/` and never end in `/`)
/// * paths must not contain relative segments (ie `.` or `..`)
/// * only characters explicitly documented as safe [in the S3
///   docs](https://docs.aws.amazon.com/AmazonS3/latest/userguide/object-keys.html) are allowed in
///   path segments
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    key: PathBuf,
}

impl Key {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Key> {
        Key::try_from(path.as_ref().to_path_buf())
    }

    /// Append validated segments to this key.
    pub fn join<P: AsRef<Path>>(&self, path: P) -> Result<Key> {
        let key = path
            .as_ref()
            .components()
            .try_fold(self.key.clone(), validate_component)?;
        Ok(Key { key })
    }

    pub fn as_path(&self) -> &Path {
        &self.key
    }

    pub(crate) fn first_segment(&self) -> Option<&str> {
        self.key.components().next().and_then(|c| c.as_os_str().to_str())
    }
}

impl From<&Key> for String {
    fn from(k: &Key) -> String {
        format!("{}", k.key.display())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.key.display())
    }
}

impl TryFrom<PathBuf> for Key {
    type Error = Error;

    fn try_from(pb: PathBuf) -> Result<Key> {
        let key = pb
            .components()
            .try_fold(PathBuf::new(), validate_component)?;
        if key.as_os_str().is_empty() {
            return Err(KeyError::Empty.into());
        }
        Ok(Key { key })
    }
}

fn validate_component(mut pb: PathBuf, c: Component<'_>) -> std::result::Result<PathBuf, KeyError> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-!.*'()]+$").expect("key regex must compile"));
    match c {
        Component::Prefix(_) => return Err(KeyError::PrefixNotAllowed),
        Component::RootDir => return Err(KeyError::RootDirNotAllowed),
        Component::CurDir => return Err(KeyError::CurDirNotAllowed),
        Component::ParentDir => return Err(KeyError::ParentDirNotAllowed),
        Component::Normal(s) => {
            if let Some(s) = s.to_str() {
                if !RE.is_match(s) {
                    return Err(KeyError::PathComponentsMustMatchRegex(
                        RE.as_str().to_string(),
                    ));
                }
            } else {
                return Err(KeyError::PathComponentsMustBeValidUnicode);
            }
        }
    }
    pb.push(c);
    Ok(pb)
}

pub type ObjectBody = BoxStream<'static, Result<Bytes>>;

/// Provides a common interface for interacting with different kinds of backend object stores.
///
/// Object retrieval methods return [`futures::stream::Stream`] over [`bytes::Bytes`]. Large
/// objects are written sequentially through an [`ObjectWriter`], which only makes the object
/// visible on [`ObjectWriter::commit`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fails with [`Error::NotFound`] if there is no object at `key`.
    async fn get(&self, key: &Key) -> Result<ObjectBody>;

    async fn exists(&self, key: &Key) -> Result<bool>;

    /// Store a small object in one request, replacing any existing object at `key`.
    async fn put(&self, key: &Key, bytes: Bytes) -> Result<()>;

    /// Deleting a key that doesn't exist is not an error.
    async fn delete(&self, key: &Key) -> Result<()>;

    /// Delete every object whose key starts with `prefix/`.
    async fn delete_prefix(&self, prefix: &Key) -> Result<()>;

    async fn writer(&self, key: &Key) -> Result<Box<dyn ObjectWriter>>;

    /// Read a whole object into memory.
    async fn get_bytes(&self, key: &Key) -> Result<Bytes> {
        let body = self.get(key).await?;
        let buf = body
            .try_fold(BytesMut::new(), |mut buf, bytes| async move {
                buf.extend_from_slice(&bytes);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }
}

/// Sequential writer for a single object.
///
/// Nothing is visible at the target key until [`ObjectWriter::commit`] returns. Dropping a
/// writer without committing cleans up whatever it has written so far.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, bytes: Bytes) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn discard(self: Box<Self>) -> Result<()>;
}
