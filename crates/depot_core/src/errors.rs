use thiserror;

use crate::session::{SessionId, SessionStatus};

pub type Result<T> = std::result::Result<T, Error>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by upload session operations.
///
/// The core never maps these onto transport status codes; that is left to the caller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad init parameters, out-of-range chunk index, oversized payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(Missing),

    /// The operation is not valid for the session's current status.
    #[error("session {id} is {status}: {reason}")]
    InvalidState {
        id: SessionId,
        status: SessionStatus,
        reason: String,
    },

    /// Lost a race on a compare-and-swap status transition.
    #[error("session {0} is being finalized by another caller")]
    Conflict(SessionId),

    /// Staging, metadata or blob store read/write failure.
    #[error("io failure: {0}")]
    IoFailure(#[source] BoxError),
}

impl Error {
    pub fn io<E: Into<BoxError>>(e: E) -> Self {
        Error::IoFailure(e.into())
    }

    pub(crate) fn invalid_state(id: SessionId, status: SessionStatus, reason: impl ToString) -> Self {
        Error::InvalidState {
            id,
            status,
            reason: reason.to_string(),
        }
    }
}

/// The thing a [`Error::NotFound`] refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Missing {
    Session(SessionId),
    Chunk { session: SessionId, index: u32 },
    Blob(String),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Missing::Session(id) => write!(f, "upload session {id}"),
            Missing::Chunk { session, index } => {
                write!(f, "staged chunk {index} of upload session {session}")
            }
            Missing::Blob(name) => write!(f, "blob named '{name}'"),
        }
    }
}
