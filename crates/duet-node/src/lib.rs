//! # Duet Node
//!
//! Composition root of a Duet deployment.
//!
//! The node wires the session manager, the per-session sequencing
//! authorities, the peer orchestrators and the recorders together:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Duet Node                          │
//! ├───────────────────────────────────────────────────────────┤
//! │  SessionManager ── admission, permissions, lifecycle      │
//! │        │  SequencingAuthority per session                 │
//! │        │                                                  │
//! │  server PeerOrchestrator per session                      │
//! │        │  proposals in, committed operations out          │
//! │        │  peer events → participant connection status     │
//! │                                                           │
//! │  Recorder per session ── consent snapshots pushed in      │
//! │                                                           │
//! │  EventLog ── every state change, fanned out on the hub    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! duet-node --config duet.yaml check-config
//! duet-node simulate --participants 4 --edits 50
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Layered configuration (defaults, YAML, `DUET__*` env)
//! - [`observability`] - Logging initialization
//! - [`service`] - The composed node
//! - [`client`] - In-process editor attached to a session
//! - [`simulate`] - Loopback collaboration run

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod service;
pub mod simulate;

pub use client::EditorClient;
pub use config::NodeConfig;
pub use error::NodeError;
pub use service::{CaptureFactory, DuetService, NodeCapabilities, SERVER_PEER_ID};
pub use simulate::{run_simulation, SimulationConfig, SimulationReport};
