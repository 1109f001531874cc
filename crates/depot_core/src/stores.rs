//! # Storage Abstractions
//!
//! Defines the collaborators the upload state machine is built on:
//!
//! * [`MetadataStore`] persists one [`UploadSession`] record per session and provides the two
//!   atomic updates the state machine relies on, set-union of received chunk indices and
//!   compare-and-swap of the session status.
//! * [`StagingBackend`] holds chunk bytes between receipt and assembly (or abort).
//! * [`BlobStore`] holds completed files. Objects written through a [`BlobWriter`] only become
//!   visible on [`BlobWriter::commit`].
//!
//! ## Known Implementations
//!
//! ### depot_core::memory
//!
//! In-process implementations of every trait, used by tests and by the `memory` development
//! backend.
//!
//! ### depot_backend
//!
//! Postgres-backed [`MetadataStore`] plus staging and blob storage on top of the
//! `depot_objectstore` crate (S3 or local filesystem).
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::ContentSummary;
use crate::errors::Result;
use crate::session::{SessionId, SessionStatus, UploadSession};

/// Identifier of a committed blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BlobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata describing a committed blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub id: BlobId,
    pub filename: String,
    pub size: u64,
    /// Lowercase hex sha256 of the blob contents.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Byte stream of a blob's contents, yielded in bounded pieces.
pub type BlobBody = BoxStream<'static, Result<Bytes>>;

/// Persists upload session records.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    /// Insert a new session record.
    async fn create(&self, session: &UploadSession) -> Result<()>;

    /// Fetch a session record, failing with [`crate::Error::NotFound`] if it doesn't exist.
    async fn get(&self, id: &SessionId) -> Result<UploadSession>;

    /// Atomically add `index` to the session's received set.
    ///
    /// Returns `false` without modifying the record if the session is no longer
    /// [`SessionStatus::InProgress`]. Adding an index that is already present succeeds and leaves
    /// the set unchanged.
    async fn add_index(&self, id: &SessionId, index: u32) -> Result<bool>;

    /// Set the session status to `new` (and its final blob id to `final_blob_id`) only if its
    /// current status is `expected`. Returns `false` if another writer got there first.
    async fn compare_and_set_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        new: SessionStatus,
        final_blob_id: Option<BlobId>,
    ) -> Result<bool>;
}

/// Scratch storage for chunk bytes, keyed by session and chunk index.
#[async_trait]
pub trait StagingBackend: Send + Sync + 'static {
    /// Durably store `bytes`, replacing anything previously staged under the same key.
    async fn put(&self, session: &SessionId, index: u32, bytes: Bytes) -> Result<()>;

    async fn get(&self, session: &SessionId, index: u32) -> Result<Bytes>;

    /// Remove one staged chunk. Removing a chunk that isn't there is not an error.
    async fn delete(&self, session: &SessionId, index: u32) -> Result<()>;

    /// Remove every staged chunk of the session. No-op if nothing is staged.
    async fn purge_all(&self, session: &SessionId) -> Result<()>;
}

/// Final, immutable storage for assembled files.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Start writing a new blob that will be retrievable under `name` once committed.
    async fn open_writer(&self, name: &str) -> Result<Box<dyn BlobWriter>>;

    /// Open the most recently committed blob named `name`.
    async fn open_reader(&self, name: &str) -> Result<(Blob, BlobBody)>;
}

/// Sequential writer for a single blob.
///
/// Dropping a writer without calling [`BlobWriter::commit`] must leave no visible object behind,
/// same as [`BlobWriter::discard`].
#[async_trait]
pub trait BlobWriter: Send {
    async fn write(&mut self, bytes: Bytes) -> Result<()>;

    /// Make the blob visible to readers. The summary describes everything written.
    async fn commit(self: Box<Self>, summary: ContentSummary) -> Result<Blob>;

    async fn discard(self: Box<Self>) -> Result<()>;
}
