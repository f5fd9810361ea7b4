//! Error types for the transform engine.

use thiserror::Error;

/// Errors that can occur while committing or applying operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    /// The author is not a current participant of the session.
    #[error("unauthorized operation: {author_id} is not a participant of session {session_id}")]
    UnauthorizedOperation {
        session_id: String,
        author_id: String,
    },

    /// The operation references a version the author cannot have seen.
    #[error("invalid version {authored} from {author_id}: {reason}")]
    InvalidVersion {
        author_id: String,
        authored: u64,
        reason: String,
    },

    /// A committed operation arrived before one of its predecessors.
    #[error("version gap: expected {expected}, received {received}")]
    VersionGap { expected: u64, received: u64 },

    /// The operation is malformed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl OtError {
    /// Stable tag for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OtError::UnauthorizedOperation { .. } => "unauthorized_operation",
            OtError::InvalidVersion { .. } => "invalid_version",
            OtError::VersionGap { .. } => "version_gap",
            OtError::InvalidOperation(_) => "invalid_operation",
        }
    }
}
