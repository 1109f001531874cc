use std::sync::Arc;

use futures::TryStreamExt;

use crate::digest::{ContentSummary, Digester};
use crate::errors::Result;
use crate::session::UploadSession;
use crate::staging::ChunkStaging;
use crate::stores::{Blob, BlobStore, BlobWriter};

/// Streams a session's staged chunks, in index order, into a single blob.
#[derive(Clone)]
pub struct Assembler {
    staging: ChunkStaging,
    blobs: Arc<dyn BlobStore>,
}

/// A blob whose bytes have all been written but which is not yet visible to readers.
///
/// Dropping it without calling [`PendingBlob::commit`] discards the writer.
pub struct PendingBlob {
    writer: Box<dyn BlobWriter>,
    summary: ContentSummary,
}

impl PendingBlob {
    pub fn summary(&self) -> &ContentSummary {
        &self.summary
    }

    /// Make the blob visible. On error nothing has become visible.
    pub async fn commit(self) -> Result<Blob> {
        let blob = self.writer.commit(self.summary).await?;
        tracing::info!(blob = %blob.id, size = blob.size, "committed assembled blob");
        Ok(blob)
    }
}

impl Assembler {
    pub fn new(staging: ChunkStaging, blobs: Arc<dyn BlobStore>) -> Self {
        Self { staging, blobs }
    }

    /// Write chunks `0..total_chunks` to a new blob named after the session's filename.
    ///
    /// On any failure the writer is discarded. Success leaves a [`PendingBlob`] that the caller
    /// commits once it is ready for the blob to become visible.
    #[tracing::instrument(skip_all, fields(session = %session.id, filename = %session.filename))]
    pub async fn assemble(&self, session: &UploadSession) -> Result<PendingBlob> {
        let mut writer = self.blobs.open_writer(&session.filename).await?;
        let mut digester = Digester::default();

        match self.copy_chunks(session, writer.as_mut(), &mut digester).await {
            Ok(()) => {
                let summary = digester.finish();
                tracing::debug!(size = summary.size, "assembled chunks");
                Ok(PendingBlob { writer, summary })
            }
            Err(e) => {
                if let Err(discard_err) = writer.discard().await {
                    tracing::warn!(error = %discard_err, "failed to discard partial blob");
                }
                Err(e)
            }
        }
    }

    async fn copy_chunks(
        &self,
        session: &UploadSession,
        writer: &mut dyn BlobWriter,
        digester: &mut Digester,
    ) -> Result<()> {
        let mut chunks = self.staging.open_ordered(session.id, session.total_chunks);
        while let Some((index, bytes)) = chunks.try_next().await? {
            tracing::trace!(index, len = bytes.len(), "appending chunk");
            digester.update(&bytes);
            writer.write(bytes).await?;
        }
        Ok(())
    }
}
