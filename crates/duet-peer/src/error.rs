//! Peer connection error types.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors that can occur while negotiating or using peer connections.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The signaling relay failed or returned an unexpected message.
    #[error("signaling with {peer_id} failed: {reason}")]
    Signaling { peer_id: String, reason: String },

    /// A negotiation stage did not finish in time.
    #[error("{stage} with {peer_id} timed out after {timeout_ms}ms")]
    Timeout {
        peer_id: String,
        stage: &'static str,
        timeout_ms: u64,
    },

    /// No connection to the peer exists.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A connection to the peer already exists.
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// The connection state machine rejected a transition.
    #[error("invalid transition for {peer_id}: {from} -> {to}")]
    InvalidTransition {
        peer_id: String,
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The transport rejected a negotiation step or a frame.
    #[error("transport error with {peer_id}: {reason}")]
    Transport { peer_id: String, reason: String },

    /// A capture device could not be acquired.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// A data-channel frame could not be encoded or decoded.
    #[error("invalid frame: {0}")]
    Frame(#[from] serde_json::Error),

    /// The orchestrator has been shut down.
    #[error("orchestrator closed")]
    Closed,
}

impl PeerError {
    /// Stable tag for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerError::Signaling { .. } => "signaling",
            PeerError::Timeout { .. } => "timeout",
            PeerError::PeerNotFound(_) => "peer_not_found",
            PeerError::AlreadyConnected(_) => "already_connected",
            PeerError::InvalidTransition { .. } => "invalid_transition",
            PeerError::Transport { .. } => "transport",
            PeerError::MediaUnavailable(_) => "media_unavailable",
            PeerError::Frame(_) => "invalid_frame",
            PeerError::Closed => "closed",
        }
    }

    /// Whether retrying the negotiation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PeerError::Signaling { .. } | PeerError::Timeout { .. } | PeerError::Transport { .. }
        )
    }
}
