//! In-process implementations of the [`crate::stores`] traits.
//!
//! Nothing here survives a restart. Useful for tests and for running the service locally
//! without Postgres or an object store.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::digest::ContentSummary;
use crate::errors::{Error, Missing, Result};
use crate::session::{SessionId, SessionStatus, UploadSession};
use crate::stores::{
    Blob, BlobBody, BlobId, BlobStore, BlobWriter, MetadataStore, StagingBackend,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    sessions: Mutex<HashMap<SessionId, UploadSession>>,
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, session: &UploadSession) -> Result<()> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(&session.id) {
            return Err(Error::InvalidArgument(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<UploadSession> {
        lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or(Error::NotFound(Missing::Session(*id)))
    }

    async fn add_index(&self, id: &SessionId, index: u32) -> Result<bool> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(id)
            .ok_or(Error::NotFound(Missing::Session(*id)))?;
        if session.status != SessionStatus::InProgress {
            return Ok(false);
        }
        session.received_chunks.insert(index);
        Ok(true)
    }

    async fn compare_and_set_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        new: SessionStatus,
        final_blob_id: Option<BlobId>,
    ) -> Result<bool> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(id)
            .ok_or(Error::NotFound(Missing::Session(*id)))?;
        if session.status != expected {
            return Ok(false);
        }
        session.status = new;
        session.final_blob_id = final_blob_id;
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryStagingBackend {
    chunks: Mutex<HashMap<(SessionId, u32), Bytes>>,
}

impl MemoryStagingBackend {
    /// Number of chunks currently staged for `session`.
    pub fn staged_count(&self, session: &SessionId) -> usize {
        lock(&self.chunks)
            .keys()
            .filter(|(s, _)| s == session)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.chunks).is_empty()
    }
}

#[async_trait]
impl StagingBackend for MemoryStagingBackend {
    async fn put(&self, session: &SessionId, index: u32, bytes: Bytes) -> Result<()> {
        lock(&self.chunks).insert((*session, index), bytes);
        Ok(())
    }

    async fn get(&self, session: &SessionId, index: u32) -> Result<Bytes> {
        lock(&self.chunks)
            .get(&(*session, index))
            .cloned()
            .ok_or(Error::NotFound(Missing::Chunk {
                session: *session,
                index,
            }))
    }

    async fn delete(&self, session: &SessionId, index: u32) -> Result<()> {
        lock(&self.chunks).remove(&(*session, index));
        Ok(())
    }

    async fn purge_all(&self, session: &SessionId) -> Result<()> {
        lock(&self.chunks).retain(|(s, _), _| s != session);
        Ok(())
    }
}

type Committed = Arc<Mutex<Vec<(Blob, Bytes)>>>;

/// Blob store keeping committed blobs in a vector, in commit order.
#[derive(Clone)]
pub struct MemoryBlobStore {
    blobs: Committed,
    buffer_size: usize,
}

impl MemoryBlobStore {
    /// `buffer_size` is the size of each piece yielded by [`BlobStore::open_reader`].
    pub fn new(buffer_size: usize) -> Self {
        Self {
            blobs: Arc::default(),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Metadata of every committed blob, oldest first.
    pub fn committed(&self) -> Vec<Blob> {
        lock(&self.blobs).iter().map(|(b, _)| b.clone()).collect()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn open_writer(&self, name: &str) -> Result<Box<dyn BlobWriter>> {
        Ok(Box::new(MemoryBlobWriter {
            name: name.to_string(),
            buf: BytesMut::new(),
            blobs: self.blobs.clone(),
        }))
    }

    async fn open_reader(&self, name: &str) -> Result<(Blob, BlobBody)> {
        let (blob, bytes) = lock(&self.blobs)
            .iter()
            .rev()
            .find(|(b, _)| b.filename == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(Missing::Blob(name.to_string())))?;

        let step = self.buffer_size;
        let pieces = (0..bytes.len())
            .step_by(step)
            .map(move |start| Ok(bytes.slice(start..(start + step).min(bytes.len()))))
            .collect::<Vec<_>>();
        Ok((blob, stream::iter(pieces).boxed()))
    }
}

struct MemoryBlobWriter {
    name: String,
    buf: BytesMut,
    blobs: Committed,
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn write(&mut self, bytes: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&bytes);
        Ok(())
    }

    async fn commit(self: Box<Self>, summary: ContentSummary) -> Result<Blob> {
        let blob = Blob {
            id: BlobId::new(),
            filename: self.name,
            size: summary.size,
            sha256: summary.sha256,
            created_at: Utc::now(),
        };
        lock(&self.blobs).push((blob.clone(), self.buf.freeze()));
        Ok(blob)
    }

    async fn discard(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
