use std::sync::Arc;

use serde::Deserialize;

use depot_core::memory::{MemoryBlobStore, MemoryMetadataStore, MemoryStagingBackend};
use depot_core::{SessionManager, UploadConfig};

use super::blobs::ObjectBlobStore;
use super::errors::Result;
use super::metadata::PostgresConfig;
use super::staging::ObjectStagingBackend;

/// Selects where session records, staged chunks and blobs are kept.
#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BackendConfig {
    Postgres(PostgresBackendConfig),
    /// Everything in process memory; lost on restart.
    Memory,
}

#[derive(Clone, Deserialize)]
pub struct PostgresBackendConfig {
    postgres: PostgresConfig,
    staging: depot_objectstore::Config,
    blobs: depot_objectstore::Config,
}

impl BackendConfig {
    /// Must be called from within a tokio runtime.
    pub async fn new_manager(&self, uploads: &UploadConfig) -> Result<SessionManager> {
        match self {
            Self::Postgres(cfg) => {
                let metadata = cfg.postgres.new_metadata().await?;
                let staging = ObjectStagingBackend::new(cfg.staging.new_objects().await?);
                let blobs = ObjectBlobStore::new(
                    cfg.blobs.new_objects().await?,
                    metadata.clone(),
                    uploads.download_buffer_size,
                );
                tracing::info!("using postgres backend");
                Ok(SessionManager::new(
                    Arc::new(metadata),
                    Arc::new(staging),
                    Arc::new(blobs),
                    uploads.clone(),
                ))
            }
            Self::Memory => {
                tracing::warn!("using in-memory backend, uploads will not survive a restart");
                Ok(SessionManager::new(
                    Arc::new(MemoryMetadataStore::default()),
                    Arc::new(MemoryStagingBackend::default()),
                    Arc::new(MemoryBlobStore::new(uploads.download_buffer_size)),
                    uploads.clone(),
                ))
            }
        }
    }
}
