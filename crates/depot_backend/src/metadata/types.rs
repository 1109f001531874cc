use chrono::{DateTime, Utc};
use sea_query::Iden;
use sqlx::Row;
use uuid::Uuid;

use depot_core::{Blob as CoreBlob, BlobId, SessionStatus, UploadSession};

pub struct SessionRow {
    pub id: Uuid,
    pub filename: String,
    pub total_chunks: i32,
    pub chunk_size: i64,
    pub received_chunks: Vec<i32>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub final_blob_id: Option<Uuid>,
}

impl sqlx::FromRow<'_, sqlx_postgres::PgRow> for SessionRow {
    fn from_row(row: &sqlx_postgres::PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            total_chunks: row.try_get("total_chunks")?,
            chunk_size: row.try_get("chunk_size")?,
            received_chunks: row.try_get("received_chunks")?,
            status: match row.try_get::<String, &str>("status")?.parse() {
                Ok(v) => v,
                Err(e) => {
                    return Err(sqlx::Error::ColumnDecode {
                        index: "status".to_string(),
                        source: format!("{}", e).into(),
                    })
                }
            },
            created_at: row.try_get("created_at")?,
            final_blob_id: row.try_get("final_blob_id")?,
        })
    }
}

impl From<SessionRow> for UploadSession {
    fn from(row: SessionRow) -> Self {
        UploadSession {
            id: row.id.into(),
            filename: row.filename,
            total_chunks: row.total_chunks as u32,
            chunk_size: row.chunk_size as u64,
            received_chunks: row.received_chunks.into_iter().map(|i| i as u32).collect(),
            status: row.status,
            created_at: row.created_at,
            final_blob_id: row.final_blob_id.map(BlobId::from),
        }
    }
}

#[derive(Iden)]
pub enum UploadSessions {
    Table,
    Id,
    Filename,
    TotalChunks,
    ChunkSize,
    ReceivedChunks,
    Status,
    CreatedAt,
    FinalBlobId,
}

#[derive(sqlx::FromRow)]
pub struct BlobRow {
    pub id: Uuid,
    pub filename: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

impl From<BlobRow> for CoreBlob {
    fn from(row: BlobRow) -> Self {
        CoreBlob {
            id: row.id.into(),
            filename: row.filename,
            size: row.size as u64,
            sha256: row.sha256,
            created_at: row.created_at,
        }
    }
}

#[derive(Iden)]
pub enum Blobs {
    Table,
    Id,
    Seq,
    Filename,
    Size,
    #[iden = "sha256"]
    Sha256,
    CreatedAt,
}
