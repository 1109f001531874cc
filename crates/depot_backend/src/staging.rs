use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use depot_core::{SessionId, StagingBackend};
use depot_objectstore::{Key, ObjectStore};

use super::errors::{Error, Result};

const STAGING_PREFIX: &str = "staging";

/// Stages chunk bytes as individual objects at `staging/<session uuid>/<index>`.
#[derive(Clone)]
pub struct ObjectStagingBackend {
    objects: Arc<dyn ObjectStore>,
}

impl ObjectStagingBackend {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    fn session_key(session: &SessionId) -> Result<Key> {
        Ok(Key::new(STAGING_PREFIX)?.join(session.to_string())?)
    }

    fn chunk_key(session: &SessionId, index: u32) -> Result<Key> {
        Ok(Self::session_key(session)?.join(index.to_string())?)
    }
}

#[async_trait]
impl StagingBackend for ObjectStagingBackend {
    async fn put(&self, session: &SessionId, index: u32, bytes: Bytes) -> depot_core::Result<()> {
        let key = Self::chunk_key(session, index)?;
        self.objects.put(&key, bytes).await.map_err(Error::from)?;
        Ok(())
    }

    async fn get(&self, session: &SessionId, index: u32) -> depot_core::Result<Bytes> {
        let key = Self::chunk_key(session, index)?;
        match self.objects.get_bytes(&key).await {
            Ok(bytes) => Ok(bytes),
            Err(depot_objectstore::Error::NotFound(_)) => Err(Error::ChunkNotFound {
                session: *session,
                index,
            }
            .into()),
            Err(e) => Err(Error::from(e).into()),
        }
    }

    async fn delete(&self, session: &SessionId, index: u32) -> depot_core::Result<()> {
        let key = Self::chunk_key(session, index)?;
        self.objects.delete(&key).await.map_err(Error::from)?;
        Ok(())
    }

    async fn purge_all(&self, session: &SessionId) -> depot_core::Result<()> {
        let key = Self::session_key(session)?;
        self.objects.delete_prefix(&key).await.map_err(Error::from)?;
        Ok(())
    }
}
