use async_trait::async_trait;

use depot_core::{BlobId, MetadataStore, SessionId, SessionStatus, UploadSession};

use super::errors::{Error, Result};
use super::metadata::{column_i32, PostgresMetadataConn, PostgresMetadataPool};

impl PostgresMetadataPool {
    async fn ensure_exists(conn: &mut PostgresMetadataConn, id: &SessionId) -> Result<()> {
        if conn.session_exists(id.as_uuid()).await? {
            Ok(())
        } else {
            Err(Error::SessionNotFound(*id))
        }
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataPool {
    async fn create(&self, session: &UploadSession) -> depot_core::Result<()> {
        let mut conn = self.get_conn().await?;
        Ok(conn.insert_session(session).await?)
    }

    async fn get(&self, id: &SessionId) -> depot_core::Result<UploadSession> {
        let mut conn = self.get_conn().await?;
        match conn.get_session(id.as_uuid()).await? {
            Some(row) => Ok(row.into()),
            None => Err(Error::SessionNotFound(*id).into()),
        }
    }

    async fn add_index(&self, id: &SessionId, index: u32) -> depot_core::Result<bool> {
        let mut conn = self.get_conn().await?;
        if conn.add_index(id.as_uuid(), column_i32("chunk index", index)?).await? == 1 {
            return Ok(true);
        }
        Self::ensure_exists(&mut conn, id).await?;
        Ok(false)
    }

    async fn compare_and_set_status(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        new: SessionStatus,
        final_blob_id: Option<BlobId>,
    ) -> depot_core::Result<bool> {
        let mut conn = self.get_conn().await?;
        let updated = conn
            .compare_and_set_status(
                id.as_uuid(),
                expected,
                new,
                final_blob_id.map(|b| *b.as_uuid()),
            )
            .await?;
        if updated == 1 {
            tracing::debug!(session = %id, from = %expected, to = %new, "session status changed");
            return Ok(true);
        }
        Self::ensure_exists(&mut conn, id).await?;
        Ok(false)
    }
}
