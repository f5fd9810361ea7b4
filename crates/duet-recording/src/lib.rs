//! # Duet Recording
//!
//! Consent-gated recording of a collaboration session.
//!
//! A [`Recorder`] captures the composed session stream in fixed-duration
//! chunks through a [`CaptureDevice`], assembles them into one artifact on
//! stop, samples a thumbnail and hands both to an [`ArtifactStore`]. Every
//! transition is appended to the session's event log.
//!
//! When consent is required, recording starts only if every participant
//! consents (admins and the owner implicitly do), and pauses itself if
//! consent is later withdrawn.

pub mod artifact;
pub mod capture;
pub mod error;
pub mod info;
pub mod recorder;

pub use artifact::{assemble, ArtifactStore, AssembledRecording, InMemoryArtifactStore, StoredArtifact};
pub use capture::{CaptureDevice, InMemoryCapture, MediaChunk};
pub use error::RecordingError;
pub use info::{RecordingInfo, RecordingStatus};
pub use recorder::{Recorder, RecorderConfig, StartRequest};

/// Result type for recording operations.
pub type Result<T> = std::result::Result<T, RecordingError>;
