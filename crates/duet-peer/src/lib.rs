//! # Duet Peer
//!
//! Peer connection orchestration for collaborative sessions.
//!
//! Each participant runs a [`PeerOrchestrator`] holding one [`Connection`]
//! per linked remote participant. Connections are negotiated through an
//! external [`SignalingChannel`], carry JSON [`DataFrame`]s on an ordered
//! data channel, and are monitored for quality. A connection that stays
//! POOR past its grace window, or that loses its transport, is renegotiated
//! with exponential backoff before `ConnectionLost` is reported.
//!
//! Platform primitives sit behind the [`PeerLink`], [`PeerLinkFactory`],
//! [`SignalingChannel`] and [`MediaSource`] traits. The [`loopback`] module
//! provides an in-process adapter.
//!
//! ## Connection states
//!
//! | State | Meaning |
//! |-------|---------|
//! | `NEW` | Created |
//! | `CONNECTING` | Offer/answer and candidates in flight |
//! | `CONNECTED` | Data and media flowing |
//! | `DISCONNECTED` | Transient loss, reconnecting |
//! | `FAILED` | Reconnection exhausted; full renegotiation needed |
//! | `CLOSED` | Closed locally |

pub mod connection;
pub mod error;
pub mod frame;
pub mod link;
pub mod loopback;
pub mod media;
pub mod orchestrator;
pub mod quality;
pub mod reconnect;
pub mod signaling;

pub use connection::{Connection, ConnectionState};
pub use error::PeerError;
pub use frame::DataFrame;
pub use link::{FrameSink, InboundFrame, PeerLink, PeerLinkFactory};
pub use loopback::{LoopbackLink, LoopbackLinkFactory, LoopbackMedia, LoopbackNetwork, LoopbackSignaling};
pub use media::{LocalMedia, MediaKind, MediaSource, MediaTrack};
pub use orchestrator::{BroadcastReport, OrchestratorConfig, PeerCapabilities, PeerEvent, PeerOrchestrator};
pub use quality::{ConnectionStats, QualityMonitor, QualityThresholds, QualityTier, QualityVerdict};
pub use reconnect::ReconnectPolicy;
pub use signaling::{SignalKind, SignalingChannel, SignalingMessage};

/// Result type for peer operations.
pub type Result<T> = std::result::Result<T, PeerError>;
