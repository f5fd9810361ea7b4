//! Recording error types.

use thiserror::Error;

use crate::info::RecordingStatus;

/// Errors that can occur while recording a session.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// Consent is required and some participants have not given it.
    #[error("recording in session {session_id} requires consent from: {}", missing.join(", "))]
    ConsentRequired {
        session_id: String,
        missing: Vec<String>,
    },

    /// Recording is disabled in the session settings.
    #[error("recording is disabled in session {session_id}")]
    RecordingDisabled { session_id: String },

    /// The transition is not valid from the current status.
    #[error("cannot {action} recording in session {session_id} while {current}")]
    InvalidState {
        session_id: String,
        action: &'static str,
        current: RecordingStatus,
    },

    /// The capture device could not start.
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),

    /// Nothing was captured before stopping.
    #[error("no media captured in session {session_id}")]
    NoData { session_id: String },

    /// The artifact could not be stored.
    #[error("artifact storage failed: {0}")]
    Storage(String),
}

impl RecordingError {
    /// Stable tag for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordingError::ConsentRequired { .. } => "consent_required",
            RecordingError::RecordingDisabled { .. } => "recording_disabled",
            RecordingError::InvalidState { .. } => "invalid_state",
            RecordingError::CaptureUnavailable(_) => "capture_unavailable",
            RecordingError::NoData { .. } => "no_data",
            RecordingError::Storage(_) => "storage",
        }
    }
}
