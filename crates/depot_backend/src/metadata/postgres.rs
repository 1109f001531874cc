use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::types::Uuid;
use sqlx::{PgConnection, Pool, Row};

use depot_core::{Blob, SessionStatus, UploadSession};

use super::super::errors::{Error, Result};
use super::types::{BlobRow, Blobs, SessionRow, UploadSessions};

/// Convert an unsigned value for an `INTEGER` column.
pub(crate) fn column_i32(column: &'static str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::ValueOutOfRange {
        column,
        value: value.into(),
    })
}

/// Convert an unsigned value for a `BIGINT` column.
pub(crate) fn column_i64(column: &'static str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::ValueOutOfRange { column, value })
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Clone, Deserialize)]
pub struct PostgresConfig {
    connection_string: String,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
}

impl PostgresConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            max_connections: default_max_connections(),
        }
    }

    /// Connect and bring the schema up to date.
    pub async fn new_metadata(&self) -> Result<PostgresMetadataPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.connection_string)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(PostgresMetadataPool { pool })
    }
}

#[derive(Clone)]
pub struct PostgresMetadataPool {
    pool: Pool<Postgres>,
}

impl PostgresMetadataPool {
    pub async fn get_conn(&self) -> Result<PostgresMetadataConn> {
        Ok(PostgresMetadataConn {
            conn: self.pool.acquire().await?,
        })
    }
}

pub struct PostgresMetadataConn {
    conn: PoolConnection<Postgres>,
}

// A collection of queries that only require a `&mut PgConnection` and don't care whether it came
// from a transaction or a pool connection.
struct Queries {}

impl Queries {
    pub async fn insert_session(executor: &mut PgConnection, session: &UploadSession) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(UploadSessions::Table)
            .columns([
                UploadSessions::Id,
                UploadSessions::Filename,
                UploadSessions::TotalChunks,
                UploadSessions::ChunkSize,
                UploadSessions::Status,
                UploadSessions::CreatedAt,
            ])
            .values([
                (*session.id.as_uuid()).into(),
                session.filename.as_str().into(),
                column_i32("total_chunks", session.total_chunks)?.into(),
                column_i64("chunk_size", session.chunk_size)?.into(),
                session.status.as_str().into(),
                session.created_at.into(),
            ])?
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values).execute(executor).await?;
        Ok(())
    }

    pub async fn get_session(executor: &mut PgConnection, id: &Uuid) -> Result<Option<SessionRow>> {
        let (sql, values) = Query::select()
            .from(UploadSessions::Table)
            .columns([
                UploadSessions::Id,
                UploadSessions::Filename,
                UploadSessions::TotalChunks,
                UploadSessions::ChunkSize,
                UploadSessions::ReceivedChunks,
                UploadSessions::Status,
                UploadSessions::CreatedAt,
                UploadSessions::FinalBlobId,
            ])
            .and_where(Expr::col(UploadSessions::Id).eq(*id))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, SessionRow, _>(&sql, values)
            .fetch_optional(executor)
            .await?)
    }

    pub async fn session_exists(executor: &mut PgConnection, id: &Uuid) -> Result<bool> {
        let (sql, values) = Query::select()
            .expr_as(
                Expr::exists(
                    Query::select()
                        .from(UploadSessions::Table)
                        .column(UploadSessions::Id)
                        .and_where(Expr::col(UploadSessions::Id).eq(*id))
                        .to_owned(),
                ),
                sea_query::Alias::new("exists"),
            )
            .build_sqlx(PostgresQueryBuilder);
        let row = sqlx::query_with(&sql, values).fetch_one(executor).await?;

        Ok(row.try_get("exists")?)
    }

    /// Set-union `index` into `received_chunks` if the session is still in progress. Returns the
    /// number of rows updated.
    pub async fn add_index(executor: &mut PgConnection, id: &Uuid, index: i32) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE upload_sessions \
             SET received_chunks = CASE \
               WHEN $2 = ANY(received_chunks) THEN received_chunks \
               ELSE array_append(received_chunks, $2) \
             END \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(index)
        .bind(SessionStatus::InProgress.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn compare_and_set_status(
        executor: &mut PgConnection,
        id: &Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        final_blob_id: Option<Uuid>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET status = $3, final_blob_id = $4 \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(final_blob_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_blob(executor: &mut PgConnection, blob: &Blob) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(Blobs::Table)
            .columns([
                Blobs::Id,
                Blobs::Filename,
                Blobs::Size,
                Blobs::Sha256,
                Blobs::CreatedAt,
            ])
            .values([
                (*blob.id.as_uuid()).into(),
                blob.filename.as_str().into(),
                column_i64("size", blob.size)?.into(),
                blob.sha256.as_str().into(),
                blob.created_at.into(),
            ])?
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values).execute(executor).await?;
        Ok(())
    }

    pub async fn latest_blob(executor: &mut PgConnection, filename: &str) -> Result<Option<BlobRow>> {
        let (sql, values) = Query::select()
            .from(Blobs::Table)
            .columns([
                Blobs::Id,
                Blobs::Filename,
                Blobs::Size,
                Blobs::Sha256,
                Blobs::CreatedAt,
            ])
            .and_where(Expr::col(Blobs::Filename).eq(filename))
            .order_by(Blobs::Seq, Order::Desc)
            .limit(1)
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, BlobRow, _>(&sql, values)
            .fetch_optional(executor)
            .await?)
    }
}

impl PostgresMetadataConn {
    pub async fn insert_session(&mut self, session: &UploadSession) -> Result<()> {
        Queries::insert_session(&mut *self.conn, session).await
    }

    pub async fn get_session(&mut self, id: &Uuid) -> Result<Option<SessionRow>> {
        Queries::get_session(&mut *self.conn, id).await
    }

    pub async fn session_exists(&mut self, id: &Uuid) -> Result<bool> {
        Queries::session_exists(&mut *self.conn, id).await
    }

    pub async fn add_index(&mut self, id: &Uuid, index: i32) -> Result<u64> {
        Queries::add_index(&mut *self.conn, id, index).await
    }

    pub async fn compare_and_set_status(
        &mut self,
        id: &Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        final_blob_id: Option<Uuid>,
    ) -> Result<u64> {
        Queries::compare_and_set_status(&mut *self.conn, id, expected, new, final_blob_id).await
    }

    pub async fn insert_blob(&mut self, blob: &Blob) -> Result<()> {
        Queries::insert_blob(&mut *self.conn, blob).await
    }

    pub async fn latest_blob(&mut self, filename: &str) -> Result<Option<BlobRow>> {
        Queries::latest_blob(&mut *self.conn, filename).await
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(0, Some(0))]
    #[case(i32::MAX as u32, Some(i32::MAX))]
    #[case(i32::MAX as u32 + 1, None)]
    #[case(u32::MAX, None)]
    fn integer_columns(#[case] value: u32, #[case] expected: Option<i32>) {
        match (column_i32("total_chunks", value), expected) {
            (Ok(v), Some(e)) => assert_eq!(v, e),
            (Err(Error::ValueOutOfRange { column, value: v }), None) => {
                assert_eq!(column, "total_chunks");
                assert_eq!(v, value as u64);
            }
            (got, _) => panic!("unexpected {got:?} for {value}"),
        }
    }

    #[rstest]
    #[case(0, Some(0))]
    #[case(i64::MAX as u64, Some(i64::MAX))]
    #[case(i64::MAX as u64 + 1, None)]
    #[case(u64::MAX, None)]
    fn bigint_columns(#[case] value: u64, #[case] expected: Option<i64>) {
        assert_eq!(column_i64("chunk_size", value).ok(), expected);
    }

    #[test]
    fn out_of_range_is_an_invalid_argument() {
        let err: depot_core::Error = column_i64("size", u64::MAX).unwrap_err().into();
        match err {
            depot_core::Error::InvalidArgument(msg) => assert!(msg.contains("size"), "{msg}"),
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }
}
