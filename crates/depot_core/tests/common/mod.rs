#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use depot_core::memory::{MemoryBlobStore, MemoryMetadataStore, MemoryStagingBackend};
use depot_core::{
    Blob, BlobBody, BlobId, BlobStore, BlobWriter, ContentSummary, Error, MetadataStore, Result,
    SessionId, SessionManager, SessionStatus, StagingBackend, UploadConfig, UploadSession,
};

pub struct Harness<B, S = MemoryStagingBackend, M = MemoryMetadataStore> {
    pub manager: SessionManager,
    pub metadata: Arc<M>,
    pub staging: Arc<S>,
    pub blobs: Arc<B>,
}

pub fn harness() -> Harness<MemoryBlobStore> {
    harness_with(MemoryBlobStore::new(4))
}

pub fn harness_with<B: BlobStore>(blobs: B) -> Harness<B> {
    build(
        MemoryMetadataStore::default(),
        MemoryStagingBackend::default(),
        blobs,
    )
}

pub fn build<B, S, M>(metadata: M, staging: S, blobs: B) -> Harness<B, S, M>
where
    B: BlobStore,
    S: StagingBackend,
    M: MetadataStore,
{
    let metadata = Arc::new(metadata);
    let staging = Arc::new(staging);
    let blobs = Arc::new(blobs);
    let mut config = UploadConfig::default();
    config.cleanup.backoff_ms = 1;
    config.completion.attempts = 3;
    config.completion.backoff_ms = 1;
    let manager = SessionManager::new(
        metadata.clone(),
        staging.clone(),
        blobs.clone(),
        config,
    );
    Harness {
        manager,
        metadata,
        staging,
        blobs,
    }
}

pub async fn read_all(body: BlobBody) -> Vec<u8> {
    use futures::TryStreamExt;
    body.try_fold(Vec::new(), |mut acc, bytes| async move {
        acc.extend_from_slice(&bytes);
        Ok(acc)
    })
    .await
    .expect("blob body should stream")
}

/// Blob store whose writers fail once more than `fail_after` bytes have been written.
pub struct FailingBlobStore {
    fail_after: usize,
    pub discarded: Arc<AtomicUsize>,
}

impl FailingBlobStore {
    pub fn new(fail_after: usize) -> Self {
        Self {
            fail_after,
            discarded: Arc::default(),
        }
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

struct FailingWriter {
    written: usize,
    fail_after: usize,
    discarded: Arc<AtomicUsize>,
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn open_writer(&self, _name: &str) -> Result<Box<dyn BlobWriter>> {
        Ok(Box::new(FailingWriter {
            written: 0,
            fail_after: self.fail_after,
            discarded: self.discarded.clone(),
        }))
    }

    async fn open_reader(&self, name: &str) -> Result<(Blob, BlobBody)> {
        Err(Error::NotFound(depot_core::Missing::Blob(name.to_string())))
    }
}

#[async_trait]
impl BlobWriter for FailingWriter {
    async fn write(&mut self, bytes: Bytes) -> Result<()> {
        self.written += bytes.len();
        if self.written > self.fail_after {
            return Err(Error::io("disk full"));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>, _summary: ContentSummary) -> Result<Blob> {
        Err(Error::io("commit should not be reached"))
    }

    async fn discard(self: Box<Self>) -> Result<()> {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory blob store that parks `open_writer` until released, so a test can act while a
/// finalize holds its claim.
pub struct GatedBlobStore {
    pub inner: MemoryBlobStore,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Default for GatedBlobStore {
    fn default() -> Self {
        Self {
            inner: MemoryBlobStore::new(4),
            entered: Arc::default(),
            release: Arc::default(),
        }
    }
}

#[async_trait]
impl BlobStore for GatedBlobStore {
    async fn open_writer(&self, name: &str) -> Result<Box<dyn BlobWriter>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.open_writer(name).await
    }

    async fn open_reader(&self, name: &str) -> Result<(Blob, BlobBody)> {
        self.inner.open_reader(name).await
    }
}

/// Memory metadata store that can fail, or park, the transition to `completed`.
#[derive(Default)]
pub struct HookedMetadataStore {
    pub inner: MemoryMetadataStore,
    failing_completions: AtomicUsize,
    gated: AtomicBool,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl HookedMetadataStore {
    /// Fail the next `n` attempts to mark a session completed.
    pub fn fail_completions(&self, n: usize) {
        self.failing_completions.store(n, Ordering::SeqCst);
    }

    /// Park the next attempt to mark a session completed until `release` is notified.
    pub fn gate_completion(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for HookedMetadataStore {
    async fn create(&self, session: &UploadSession) -> Result<()> {
        self.inner.create(session).await
    }

    async fn get(&self, id: &SessionId) -> Result<UploadSession> {
        self.inner.get(id).await
    }

    async fn add_index(&self, id: &SessionId, index: u32) -> Result<bool> {
        self.inner.add_index(id, index).await
    }

    async fn compare_and_set_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        new: SessionStatus,
        final_blob_id: Option<BlobId>,
    ) -> Result<bool> {
        if new == SessionStatus::Completed {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            if self
                .failing_completions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::io("metadata store unavailable"));
            }
        }
        self.inner
            .compare_and_set_status(id, expected, new, final_blob_id)
            .await
    }
}

/// Memory staging backend that can park the next `put` until released.
#[derive(Default)]
pub struct GatedStagingBackend {
    pub inner: MemoryStagingBackend,
    gated: AtomicBool,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedStagingBackend {
    pub fn gate_next_put(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StagingBackend for GatedStagingBackend {
    async fn put(&self, session: &SessionId, index: u32, bytes: Bytes) -> Result<()> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.put(session, index, bytes).await
    }

    async fn get(&self, session: &SessionId, index: u32) -> Result<Bytes> {
        self.inner.get(session, index).await
    }

    async fn delete(&self, session: &SessionId, index: u32) -> Result<()> {
        self.inner.delete(session, index).await
    }

    async fn purge_all(&self, session: &SessionId) -> Result<()> {
        self.inner.purge_all(session).await
    }
}
