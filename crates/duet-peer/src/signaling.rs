//! Signaling messages relayed between peers during negotiation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Kind of a signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "OFFER",
            SignalKind::Answer => "ANSWER",
            SignalKind::IceCandidate => "ICE_CANDIDATE",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An offer, answer or candidate addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    pub session_id: String,
    pub from_peer_id: String,
    pub to_peer_id: String,
    pub kind: SignalKind,
    /// Opaque description or candidate.
    pub payload: String,
}

impl SignalingMessage {
    pub fn new(
        session_id: impl Into<String>,
        from_peer_id: impl Into<String>,
        to_peer_id: impl Into<String>,
        kind: SignalKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            from_peer_id: from_peer_id.into(),
            to_peer_id: to_peer_id.into(),
            kind,
            payload: payload.into(),
        }
    }
}

/// External relay that carries signaling messages between peers.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Delivers a message to its `to_peer_id`.
    async fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Waits for the next message of `kind` sent by `from_peer_id` to
    /// `local_peer_id`.
    async fn recv(
        &self,
        local_peer_id: &str,
        from_peer_id: &str,
        kind: SignalKind,
    ) -> Result<SignalingMessage>;
}
