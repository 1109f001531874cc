use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::stores::BlobId;

/// Opaque upload session identifier.
///
/// Always a UUID, which is what makes it safe to embed in staging keys and paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidArgument(format!("invalid session id '{s}': {e}")))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    /// Held by the single caller currently assembling the session.
    Finalizing,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "finalizing" => Ok(SessionStatus::Finalizing),
            "completed" => Ok(SessionStatus::Completed),
            "aborted" => Ok(SessionStatus::Aborted),
            s => Err(Error::InvalidArgument(format!("unknown session status '{s}'"))),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted record of one resumable upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub id: SessionId,
    pub filename: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub received_chunks: BTreeSet<u32>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    /// Set iff `status` is [`SessionStatus::Completed`].
    pub final_blob_id: Option<BlobId>,
}

impl UploadSession {
    pub fn new(filename: impl Into<String>, total_chunks: u32, chunk_size: u64) -> Self {
        Self {
            id: SessionId::new(),
            filename: filename.into(),
            total_chunks,
            chunk_size,
            received_chunks: BTreeSet::new(),
            status: SessionStatus::InProgress,
            created_at: Utc::now(),
            final_blob_id: None,
        }
    }

    /// Whether the received set is exactly `{0, .., total_chunks - 1}`.
    ///
    /// Compares membership rather than cardinality: a set holding an out-of-range index in place
    /// of a missing one has the right size but is not complete.
    pub fn is_complete(&self) -> bool {
        self.received_chunks.iter().copied().eq(0..self.total_chunks)
    }

    /// Indices in `[0, total_chunks)` that have not been received yet.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    pub fn check_index(&self, index: u32) -> Result<()> {
        if index >= self.total_chunks {
            return Err(Error::InvalidArgument(format!(
                "chunk index {index} out of range [0, {})",
                self.total_chunks
            )));
        }
        Ok(())
    }

    pub fn ensure_in_progress(&self, operation: &str) -> Result<()> {
        match self.status {
            SessionStatus::InProgress => Ok(()),
            status => Err(Error::invalid_state(
                self.id,
                status,
                format!("cannot {operation}"),
            )),
        }
    }
}
