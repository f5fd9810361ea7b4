//! Errors surfaced by the node's service layer.

use duet_ot::OtError;
use duet_peer::PeerError;
use duet_recording::RecordingError;
use duet_session::SessionError;
use thiserror::Error;

/// Errors returned by the composed node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Document(#[from] OtError),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// A wait on the network did not finish in time.
    #[error("timed out waiting for {what}")]
    Timeout { what: String },
}

impl NodeError {
    /// Stable tag of the underlying error.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Config(_) => "config",
            NodeError::Session(e) => e.kind(),
            NodeError::Peer(e) => e.kind(),
            NodeError::Recording(e) => e.kind(),
            NodeError::Document(e) => e.kind(),
            NodeError::Task(_) => "task",
            NodeError::Timeout { .. } => "timeout",
        }
    }
}
