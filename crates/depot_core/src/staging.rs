use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::errors::{Error, Missing, Result};
use crate::session::SessionId;
use crate::stores::StagingBackend;

/// Chunk payloads in ascending index order, paired with their index.
pub type StagedChunks = BoxStream<'static, Result<(u32, Bytes)>>;

/// Scratch storage for chunk bytes, addressed by session and chunk index.
#[derive(Clone)]
pub struct ChunkStaging {
    backend: Arc<dyn StagingBackend>,
}

impl ChunkStaging {
    pub fn new(backend: Arc<dyn StagingBackend>) -> Self {
        Self { backend }
    }

    pub async fn put(&self, session: &SessionId, index: u32, bytes: Bytes) -> Result<()> {
        self.backend.put(session, index, bytes).await
    }

    pub async fn delete(&self, session: &SessionId, index: u32) -> Result<()> {
        self.backend.delete(session, index).await
    }

    pub async fn purge(&self, session: &SessionId) -> Result<()> {
        self.backend.purge_all(session).await
    }

    /// Lazily read chunks `0..total_chunks` one at a time.
    ///
    /// Each call starts from index zero. A chunk missing at read time ends the stream with
    /// [`Error::NotFound`].
    pub fn open_ordered(&self, session: SessionId, total_chunks: u32) -> StagedChunks {
        let backend = self.backend.clone();
        stream::try_unfold(0u32, move |index| {
            let backend = backend.clone();
            async move {
                if index >= total_chunks {
                    return Ok::<_, Error>(None);
                }
                let bytes = backend
                    .get(&session, index)
                    .await
                    .map_err(|e| match e {
                        Error::NotFound(_) => Error::NotFound(Missing::Chunk { session, index }),
                        e => e,
                    })?;
                Ok(Some(((index, bytes), index + 1)))
            }
        })
        .boxed()
    }
}
