use std::sync::Arc;

use bytes::Bytes;
use tracing::Instrument;

use crate::assembler::{Assembler, PendingBlob};
use crate::cleanup::CleanupQueue;
use crate::config::{RetryConfig, UploadConfig};
use crate::errors::{Error, Result};
use crate::locks::SessionLocks;
use crate::session::{SessionId, SessionStatus, UploadSession};
use crate::staging::ChunkStaging;
use crate::stores::{Blob, BlobBody, BlobId, BlobStore, MetadataStore, StagingBackend};

/// Owns the upload session state machine.
///
/// ```text
/// in_progress ──finalize──▶ finalizing ──▶ completed
///      │    ◀──rollback─────────┘
///      └──abort──▶ aborted
/// ```
///
/// At most one finalize per session assembles a blob. That guarantee comes from the
/// compare-and-swap on the session record, so it holds across any number of manager instances
/// sharing a [`MetadataStore`]. Once the blob has been committed the session only ever moves on
/// to `completed`.
///
/// Within one manager (and its clones) chunk writes and the finalize claim are serialized per
/// session, so a chunk is never overwritten while it is being assembled.
#[derive(Clone)]
pub struct SessionManager {
    metadata: Arc<dyn MetadataStore>,
    staging: ChunkStaging,
    blobs: Arc<dyn BlobStore>,
    assembler: Assembler,
    cleanup: CleanupQueue,
    locks: SessionLocks,
    config: UploadConfig,
}

impl SessionManager {
    /// Must be called from within a tokio runtime; spawns the cleanup worker.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        staging: Arc<dyn StagingBackend>,
        blobs: Arc<dyn BlobStore>,
        config: UploadConfig,
    ) -> Self {
        let staging = ChunkStaging::new(staging);
        let assembler = Assembler::new(staging.clone(), blobs.clone());
        let cleanup = CleanupQueue::spawn(staging.clone(), config.cleanup.clone());
        Self {
            metadata,
            staging,
            blobs,
            assembler,
            cleanup,
            locks: SessionLocks::default(),
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn cleanup(&self) -> &CleanupQueue {
        &self.cleanup
    }

    #[tracing::instrument(skip(self))]
    pub async fn init_upload(
        &self,
        filename: &str,
        total_chunks: u32,
        chunk_size: u64,
    ) -> Result<SessionId> {
        if filename.is_empty() {
            return Err(Error::InvalidArgument("filename must not be empty".into()));
        }
        if total_chunks == 0 {
            return Err(Error::InvalidArgument("total_chunks must be greater than zero".into()));
        }
        if chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk_size must be greater than zero".into()));
        }
        if total_chunks > self.config.max_total_chunks {
            return Err(Error::InvalidArgument(format!(
                "total_chunks {total_chunks} exceeds the limit of {}",
                self.config.max_total_chunks
            )));
        }
        if chunk_size > self.config.max_chunk_size {
            return Err(Error::InvalidArgument(format!(
                "chunk_size {chunk_size} exceeds the limit of {}",
                self.config.max_chunk_size
            )));
        }

        let session = UploadSession::new(filename, total_chunks, chunk_size);
        self.metadata.create(&session).await?;
        tracing::debug!(session = %session.id, "created upload session");
        Ok(session.id)
    }

    /// Stage one chunk and mark its index as received.
    ///
    /// Re-sending an index replaces the staged bytes.
    #[tracing::instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn record_chunk(&self, id: &SessionId, index: u32, payload: Bytes) -> Result<()> {
        let _shared = self.locks.read(id).await;
        let session = self.metadata.get(id).await?;
        session.ensure_in_progress("record a chunk")?;
        session.check_index(index)?;
        if payload.len() as u64 > session.chunk_size {
            return Err(Error::InvalidArgument(format!(
                "chunk of {} bytes exceeds the declared chunk size of {}",
                payload.len(),
                session.chunk_size
            )));
        }

        self.staging.put(id, index, payload).await?;
        if self.metadata.add_index(id, index).await? {
            tracing::debug!("recorded chunk");
            return Ok(());
        }

        // the session moved on while the bytes were being staged
        let current = self.metadata.get(id).await?;
        if current.status.is_terminal() {
            if let Err(e) = self.staging.delete(id, index).await {
                tracing::warn!(error = %e, "failed to delete chunk staged after session ended");
            }
        }
        Err(Error::invalid_state(*id, current.status, "cannot record a chunk"))
    }

    /// Assemble a complete session into a blob and return its id.
    ///
    /// Fails with [`Error::InvalidState`] unless every index in `0..total_chunks` has been
    /// received, and with [`Error::Conflict`] if another caller holds the finalize claim.
    #[tracing::instrument(skip(self))]
    pub async fn finalize(&self, id: &SessionId) -> Result<BlobId> {
        let (session, claim) = {
            let _exclusive = self.locks.write(id).await;

            let session = self.metadata.get(id).await?;
            match session.status {
                SessionStatus::InProgress => {}
                SessionStatus::Finalizing => return Err(Error::Conflict(*id)),
                status => return Err(Error::invalid_state(*id, status, "cannot finalize")),
            }
            if !session.is_complete() {
                return Err(Error::invalid_state(
                    *id,
                    session.status,
                    format!("missing chunks {:?}", session.missing_chunks()),
                ));
            }

            if !self
                .metadata
                .compare_and_set_status(
                    id,
                    SessionStatus::InProgress,
                    SessionStatus::Finalizing,
                    None,
                )
                .await?
            {
                return Err(self.lost_race(id).await);
            }
            (session, Claim::new(self.metadata.clone(), *id))
        };

        let pending = match self.assembler.assemble(&session).await {
            Ok(pending) => pending,
            Err(e) => {
                claim.release().await;
                return Err(e);
            }
        };

        // the blob may become visible from here on, so the claim is never handed back
        claim.disarm();
        let completion = tokio::spawn(
            complete(
                self.metadata.clone(),
                self.cleanup.clone(),
                self.config.completion.clone(),
                *id,
                pending,
            )
            .in_current_span(),
        );
        completion.await.map_err(Error::io)?
    }

    async fn lost_race(&self, id: &SessionId) -> Error {
        match self.metadata.get(id).await {
            Ok(current) if current.status == SessionStatus::Aborted => {
                Error::invalid_state(*id, current.status, "cannot finalize")
            }
            Ok(_) => Error::Conflict(*id),
            Err(e) => e,
        }
    }

    /// Mark the session aborted and purge its staged chunks.
    ///
    /// Aborting an already-aborted session purges again and succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn abort(&self, id: &SessionId) -> Result<()> {
        let session = self.metadata.get(id).await?;
        match session.status {
            SessionStatus::Aborted => {}
            SessionStatus::Finalizing => return Err(Error::Conflict(*id)),
            SessionStatus::Completed => {
                return Err(Error::invalid_state(*id, session.status, "cannot abort"))
            }
            SessionStatus::InProgress => {
                if !self
                    .metadata
                    .compare_and_set_status(
                        id,
                        SessionStatus::InProgress,
                        SessionStatus::Aborted,
                        None,
                    )
                    .await?
                {
                    let current = self.metadata.get(id).await?;
                    match current.status {
                        SessionStatus::Aborted => {}
                        SessionStatus::Completed => {
                            return Err(Error::invalid_state(*id, current.status, "cannot abort"))
                        }
                        _ => return Err(Error::Conflict(*id)),
                    }
                }
            }
        }

        self.staging.purge(id).await?;
        tracing::info!("aborted upload session");
        Ok(())
    }

    pub async fn status(&self, id: &SessionId) -> Result<UploadSession> {
        self.metadata.get(id).await
    }

    /// Open the most recently committed blob named `filename` for streaming.
    #[tracing::instrument(skip(self))]
    pub async fn retrieve(&self, filename: &str) -> Result<(Blob, BlobBody)> {
        self.blobs.open_reader(filename).await
    }
}

/// The `finalizing` status held by the finalize winner.
///
/// Until disarmed, dropping the claim (including when the finalize future is cancelled) hands
/// the session back to `in_progress` so the client can retry.
struct Claim {
    metadata: Arc<dyn MetadataStore>,
    id: SessionId,
    armed: bool,
}

impl Claim {
    fn new(metadata: Arc<dyn MetadataStore>, id: SessionId) -> Self {
        Self {
            metadata,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn release(mut self) {
        self.armed = false;
        rollback(self.metadata.clone(), self.id).await;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(rollback(self.metadata.clone(), self.id));
            }
            Err(_) => {
                tracing::error!(session = %self.id, "no runtime to release finalize claim");
            }
        }
    }
}

/// Commit the assembled blob and mark the session completed.
///
/// Runs detached from the finalize caller so that dropping the caller cannot separate the two.
/// A failed commit hands the claim back. After a successful commit the completion is retried
/// and, if it still fails, the session is left `finalizing` with the blob logged.
async fn complete(
    metadata: Arc<dyn MetadataStore>,
    cleanup: CleanupQueue,
    retry: RetryConfig,
    id: SessionId,
    pending: PendingBlob,
) -> Result<BlobId> {
    let blob = match pending.commit().await {
        Ok(blob) => blob,
        Err(e) => {
            rollback(metadata, id).await;
            return Err(e);
        }
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        match metadata
            .compare_and_set_status(
                &id,
                SessionStatus::Finalizing,
                SessionStatus::Completed,
                Some(blob.id),
            )
            .await
        {
            Ok(true) => break,
            Ok(false) => {
                tracing::error!(blob = %blob.id, "finalize claim was taken away during assembly");
                return Err(Error::Conflict(id));
            }
            Err(e) if attempt < retry.attempts => {
                tracing::warn!(blob = %blob.id, attempt, error = %e, "failed to complete session, retrying");
                tokio::time::sleep(retry.delay(attempt)).await;
            }
            Err(e) => {
                tracing::error!(
                    blob = %blob.id,
                    attempts = attempt,
                    error = %e,
                    "blob committed but session left finalizing"
                );
                return Err(e);
            }
        }
    }

    cleanup.schedule(id);
    tracing::info!(blob = %blob.id, "finalized upload session");
    Ok(blob.id)
}

async fn rollback(metadata: Arc<dyn MetadataStore>, id: SessionId) {
    match metadata
        .compare_and_set_status(&id, SessionStatus::Finalizing, SessionStatus::InProgress, None)
        .await
    {
        Ok(true) => tracing::warn!(session = %id, "released finalize claim"),
        Ok(false) => tracing::warn!(session = %id, "finalize claim already released"),
        Err(e) => tracing::error!(session = %id, error = %e, "failed to release finalize claim"),
    }
}
