//! Per-peer connection state.

use duet_types::{now_millis, UserId};
use serde::{Deserialize, Serialize};

use crate::error::PeerError;
use crate::quality::{ConnectionStats, QualityTier};
use crate::Result;

/// The state of a peer connection.
///
/// ```text
/// NEW -> CONNECTING -> CONNECTED <-> DISCONNECTED -> FAILED
///            \                                      /
///             +--------------> CLOSED <------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Created, nothing negotiated yet.
    New,
    /// Offer/answer and candidates being exchanged.
    Connecting,
    /// Negotiation completed, data and media flowing.
    Connected,
    /// Transient loss; reconnection may restore it.
    Disconnected,
    /// Terminal until fully renegotiated.
    Failed,
    /// Closed locally.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "NEW",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Failed => "FAILED",
            ConnectionState::Closed => "CLOSED",
        }
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, Connecting) => true,
            (Connecting, Connected) | (Connecting, Failed) => true,
            (Connected, Disconnected) => true,
            (Disconnected, Connected) | (Disconnected, Failed) => true,
            (Failed, Connecting) => true,
            _ => false,
        }
    }

    pub fn is_open(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One link between the local participant and a remote one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub local_id: UserId,
    pub remote_id: UserId,
    pub state: ConnectionState,
    /// Last sampled statistics.
    pub stats: Option<ConnectionStats>,
    /// Last classified quality.
    pub quality: Option<QualityTier>,
    pub created_at: u64,
    pub connected_at: Option<u64>,
    pub last_seen: u64,
    /// Reconnection attempts since the last loss.
    pub reconnect_attempts: u32,
}

impl Connection {
    pub fn new(local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            state: ConnectionState::New,
            stats: None,
            quality: None,
            created_at: now,
            connected_at: None,
            last_seen: now,
            reconnect_attempts: 0,
        }
    }

    /// Moves to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState> {
        let previous = self.state;
        if previous == next {
            return Ok(previous);
        }
        if !previous.can_transition_to(next) {
            return Err(PeerError::InvalidTransition {
                peer_id: self.remote_id.clone(),
                from: previous,
                to: next,
            });
        }

        self.state = next;
        if next == ConnectionState::Connected {
            self.reconnect_attempts = 0;
            self.connected_at.get_or_insert_with(now_millis);
            self.touch();
        }
        Ok(previous)
    }

    /// Updates the last seen timestamp.
    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }
}
