//! # Depot Core
//!
//! Resumable, chunked uploads into a durable blob store.
//!
//! A client opens an [`UploadSession`] with [`SessionManager::init_upload`], sends chunks in any
//! order with [`SessionManager::record_chunk`], and finally calls [`SessionManager::finalize`]
//! to have the staged chunks streamed, in index order, into a [`BlobStore`]. Sessions that are
//! no longer wanted are torn down with [`SessionManager::abort`].
//!
//! Everything that touches persistent state sits behind the traits in [`stores`] so that
//! backends (see the `depot_backend` crate) can be swapped without touching the state machine.
//! The [`memory`] module provides in-process implementations of each of them.
mod config;
pub use config::{RetryConfig, UploadConfig};

pub mod errors;
pub use errors::{BoxError, Error, Missing, Result};

mod digest;
pub use digest::{ContentSummary, Digester};

mod session;
pub use session::{SessionId, SessionStatus, UploadSession};

pub mod stores;
pub use stores::{Blob, BlobBody, BlobId, BlobStore, BlobWriter, MetadataStore, StagingBackend};

mod staging;
pub use staging::{ChunkStaging, StagedChunks};

mod assembler;
pub use assembler::{Assembler, PendingBlob};

mod cleanup;
pub use cleanup::{CleanupQueue, CleanupSnapshot};

mod locks;

mod manager;
pub use manager::SessionManager;

pub mod memory;
