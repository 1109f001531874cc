use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};

use depot_core::{Blob, BlobBody, BlobId, BlobStore, BlobWriter, ContentSummary};
use depot_objectstore::{Key, ObjectBody, ObjectStore, ObjectWriter};

use super::errors::{Error, Result};
use super::metadata::PostgresMetadataPool;

const BLOB_PREFIX: &str = "blobs";

fn blob_key(id: &BlobId) -> Result<Key> {
    Ok(Key::new(BLOB_PREFIX)?.join(id.to_string())?)
}

/// Split each piece of `body` so that none is larger than `max` bytes.
fn bounded(body: ObjectBody, max: usize) -> BlobBody {
    let max = max.max(1);
    body.map_err(|e| depot_core::Error::from(Error::from(e)))
        .map_ok(move |mut bytes| {
            let mut pieces = Vec::with_capacity(bytes.len() / max + 1);
            while bytes.len() > max {
                pieces.push(bytes.split_to(max));
            }
            pieces.push(bytes);
            stream::iter(pieces.into_iter().map(Ok::<Bytes, depot_core::Error>))
        })
        .try_flatten()
        .boxed()
}

/// Blob bytes live in the object store at `blobs/<uuid>`; the blob row in Postgres is written
/// last and is what makes the blob retrievable by name.
#[derive(Clone)]
pub struct ObjectBlobStore {
    objects: Arc<dyn ObjectStore>,
    metadata: PostgresMetadataPool,
    buffer_size: usize,
}

impl ObjectBlobStore {
    pub fn new(objects: Arc<dyn ObjectStore>, metadata: PostgresMetadataPool, buffer_size: usize) -> Self {
        Self {
            objects,
            metadata,
            buffer_size,
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn open_writer(&self, name: &str) -> depot_core::Result<Box<dyn BlobWriter>> {
        let id = BlobId::new();
        let key = blob_key(&id)?;
        let writer = self.objects.writer(&key).await.map_err(Error::from)?;
        Ok(Box::new(ObjectBlobWriter {
            id,
            name: name.to_string(),
            key,
            writer,
            objects: self.objects.clone(),
            metadata: self.metadata.clone(),
        }))
    }

    async fn open_reader(&self, name: &str) -> depot_core::Result<(Blob, BlobBody)> {
        let mut conn = self.metadata.get_conn().await?;
        let blob: Blob = conn
            .latest_blob(name)
            .await?
            .ok_or_else(|| Error::BlobNotFound(name.to_string()))?
            .into();
        drop(conn);

        let body = self
            .objects
            .get(&blob_key(&blob.id)?)
            .await
            .map_err(Error::from)?;
        Ok((blob, bounded(body, self.buffer_size)))
    }
}

struct ObjectBlobWriter {
    id: BlobId,
    name: String,
    key: Key,
    writer: Box<dyn ObjectWriter>,
    objects: Arc<dyn ObjectStore>,
    metadata: PostgresMetadataPool,
}

async fn insert_row(metadata: &PostgresMetadataPool, blob: &Blob) -> Result<()> {
    let mut conn = metadata.get_conn().await?;
    conn.insert_blob(blob).await
}

#[async_trait]
impl BlobWriter for ObjectBlobWriter {
    async fn write(&mut self, bytes: Bytes) -> depot_core::Result<()> {
        self.writer.write(bytes).await.map_err(Error::from)?;
        Ok(())
    }

    async fn commit(self: Box<Self>, summary: ContentSummary) -> depot_core::Result<Blob> {
        let Self {
            id,
            name,
            key,
            writer,
            objects,
            metadata,
        } = *self;
        writer.commit().await.map_err(Error::from)?;

        let blob = Blob {
            id,
            filename: name,
            size: summary.size,
            sha256: summary.sha256,
            created_at: Utc::now(),
        };
        if let Err(e) = insert_row(&metadata, &blob).await {
            if let Err(cleanup) = objects.delete(&key).await {
                tracing::warn!(%key, error = %cleanup, "failed to delete unreferenced blob object");
            }
            return Err(e.into());
        }
        tracing::debug!(blob = %blob.id, %key, "committed blob");
        Ok(blob)
    }

    async fn discard(self: Box<Self>) -> depot_core::Result<()> {
        self.writer.discard().await.map_err(Error::from)?;
        Ok(())
    }
}
