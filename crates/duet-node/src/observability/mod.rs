//! # Observability
//!
//! Structured logging for the node. Every crate logs through `tracing`
//! with structured fields; this module installs the subscriber.
//!
//! ```rust,no_run
//! use duet_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Json);
//! ```

mod logging;

pub use logging::{init_logging, LogFormat};
