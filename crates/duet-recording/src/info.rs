//! Recording status and artifact metadata.

use duet_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recording state machine.
///
/// ```text
/// NOT_RECORDING -> RECORDING <-> PAUSED
///                      \          /
///                       PROCESSING -> READY
///                           \
///                            FAILED
/// ```
///
/// Aborting from RECORDING, PAUSED or PROCESSING returns to NOT_RECORDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    NotRecording,
    Recording,
    Paused,
    Processing,
    Ready,
    /// Processing failed; the attempt produced no artifact.
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::NotRecording => "NOT_RECORDING",
            RecordingStatus::Recording => "RECORDING",
            RecordingStatus::Paused => "PAUSED",
            RecordingStatus::Processing => "PROCESSING",
            RecordingStatus::Ready => "READY",
            RecordingStatus::Failed => "FAILED",
        }
    }

    /// Whether a new attempt may start from this status.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            RecordingStatus::NotRecording | RecordingStatus::Ready | RecordingStatus::Failed
        )
    }

    /// Whether capture is running or suspended.
    pub fn is_capturing(&self) -> bool {
        matches!(self, RecordingStatus::Recording | RecordingStatus::Paused)
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything known about one recording attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub id: String,
    pub session_id: String,
    pub status: RecordingStatus,
    pub consent_required: bool,
    /// Effective consent per participant when the attempt started, updated
    /// on later consent changes.
    pub participants_consent: BTreeMap<UserId, bool>,
    pub started_by: Option<UserId>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    /// Captured time, paused stretches excluded.
    pub duration_seconds: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub chunk_count: usize,
    /// Why the previous attempt was aborted or failed.
    pub error: Option<String>,
}

impl RecordingInfo {
    /// A fresh NOT_RECORDING record.
    pub fn idle(session_id: impl Into<String>) -> Self {
        Self {
            id: duet_types::new_id(),
            session_id: session_id.into(),
            status: RecordingStatus::NotRecording,
            consent_required: false,
            participants_consent: BTreeMap::new(),
            started_by: None,
            start_time: None,
            end_time: None,
            duration_seconds: None,
            file_size_bytes: None,
            url: None,
            thumbnail_url: None,
            chunk_count: 0,
            error: None,
        }
    }

    /// Participants whose consent is missing.
    pub fn missing_consent(&self) -> Vec<String> {
        missing_consent(&self.participants_consent)
    }
}

pub(crate) fn missing_consent(consent: &BTreeMap<UserId, bool>) -> Vec<String> {
    consent
        .iter()
        .filter(|(_, given)| !**given)
        .map(|(id, _)| id.clone())
        .collect()
}
