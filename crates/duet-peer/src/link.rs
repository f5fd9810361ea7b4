//! Transport capability interfaces.
//!
//! The orchestrator drives negotiation and monitoring through these traits
//! only; a platform adapter supplies the actual connection primitives.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::media::{LocalMedia, MediaTrack};
use crate::quality::ConnectionStats;
use crate::Result;

/// A raw data-channel frame received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub from_peer_id: String,
    pub payload: String,
}

/// Where links push the frames they receive.
pub type FrameSink = mpsc::UnboundedSender<InboundFrame>;

/// One transport connection to a remote peer, with its ordered data channel.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn remote_id(&self) -> &str;

    /// Produces the local session description offer.
    async fn create_offer(&self) -> Result<String>;

    /// Applies a remote offer and produces the answer.
    async fn accept_offer(&self, offer: &str) -> Result<String>;

    /// Applies the remote answer to our offer.
    async fn apply_answer(&self, answer: &str) -> Result<()>;

    /// Local reachability candidates to signal to the remote peer.
    async fn local_candidates(&self) -> Result<Vec<String>>;

    async fn add_candidate(&self, candidate: &str) -> Result<()>;

    /// Resolves once media and data are flowing.
    async fn wait_connected(&self) -> Result<()>;

    /// Sends a frame on the ordered data channel.
    async fn send(&self, frame: &str) -> Result<()>;

    async fn stats(&self) -> Result<ConnectionStats>;

    /// Substitutes the outgoing video track without renegotiating.
    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<()>;

    /// Restarts connectivity after a loss.
    async fn restart(&self) -> Result<()>;

    /// Tears the connection down. Returns once closed.
    fn close(&self);
}

/// Creates links for the orchestrator.
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    /// Creates a link to `remote_id` carrying the tracks in `media`.
    async fn create(
        &self,
        local_id: &str,
        remote_id: &str,
        media: &LocalMedia,
        inbound: FrameSink,
    ) -> Result<Arc<dyn PeerLink>>;
}
