use thiserror;

use depot_core::{Missing, SessionId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("objectstore error: {0}")]
    ObjectStoreError(#[from] depot_objectstore::Error),

    #[error("sqlx error: {0}")]
    SQLXError(#[from] sqlx::Error),
    #[error("sqlx migration error: {0}")]
    SQLXMigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("sea-query error: {0}")]
    SeaQueryError(#[from] sea_query::error::Error),

    #[error("upload session {0} not found")]
    SessionNotFound(SessionId),
    #[error("staged chunk {index} of upload session {session} not found")]
    ChunkNotFound { session: SessionId, index: u32 },
    #[error("blob named '{0}' not found")]
    BlobNotFound(String),

    #[error("{column} of {value} is too large to store")]
    ValueOutOfRange { column: &'static str, value: u64 },
}

impl From<Error> for depot_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::SessionNotFound(id) => depot_core::Error::NotFound(Missing::Session(id)),
            Error::ChunkNotFound { session, index } => {
                depot_core::Error::NotFound(Missing::Chunk { session, index })
            }
            Error::BlobNotFound(name) => depot_core::Error::NotFound(Missing::Blob(name)),
            e @ Error::ValueOutOfRange { .. } => depot_core::Error::InvalidArgument(e.to_string()),
            e => depot_core::Error::IoFailure(Box::new(e)),
        }
    }
}
