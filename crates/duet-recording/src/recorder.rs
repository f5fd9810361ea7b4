//! Consent-gated session recorder.

use duet_realtime::{EventKind, EventLog};
use duet_types::{now_millis, UserId};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::artifact::{assemble, ArtifactStore};
use crate::capture::{CaptureDevice, MediaChunk};
use crate::error::RecordingError;
use crate::info::{missing_consent, RecordingInfo, RecordingStatus};
use crate::Result;

/// Recorder settings.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Duration of each captured chunk.
    pub chunk_duration: Duration,
    /// Where in the recording the thumbnail frame is sampled, 0.0 to 1.0.
    pub thumbnail_fraction: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_secs(1),
            thumbnail_fraction: 0.1,
        }
    }
}

/// What a recording attempt needs to know about the session.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub requested_by: UserId,
    pub recording_enabled: bool,
    pub consent_required: bool,
    /// Effective consent per participant; admins and the owner count as
    /// consenting.
    pub participants_consent: BTreeMap<UserId, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseCause {
    Manual,
    Hidden,
    Consent,
}

impl PauseCause {
    fn as_str(&self) -> &'static str {
        match self {
            PauseCause::Manual => "manual",
            PauseCause::Hidden => "hidden",
            PauseCause::Consent => "consent",
        }
    }
}

#[derive(Debug)]
struct RecorderState {
    info: RecordingInfo,
    receiver: Option<mpsc::UnboundedReceiver<MediaChunk>>,
    paused_by: Option<PauseCause>,
}

/// Records one session.
///
/// Every transition runs under the recorder's own lock, so the recording
/// state is never changed by two callers at once.
pub struct Recorder {
    session_id: String,
    config: RecorderConfig,
    device: Arc<dyn CaptureDevice>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<EventLog>,
    state: Mutex<RecorderState>,
}

impl Recorder {
    pub fn new(
        session_id: impl Into<String>,
        config: RecorderConfig,
        device: Arc<dyn CaptureDevice>,
        store: Arc<dyn ArtifactStore>,
        events: Arc<EventLog>,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            state: Mutex::new(RecorderState {
                info: RecordingInfo::idle(&session_id),
                receiver: None,
                paused_by: None,
            }),
            session_id,
            config,
            device,
            store,
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn info(&self) -> RecordingInfo {
        self.state.lock().await.info.clone()
    }

    pub async fn status(&self) -> RecordingStatus {
        self.state.lock().await.info.status
    }

    fn invalid(&self, action: &'static str, current: RecordingStatus) -> RecordingError {
        RecordingError::InvalidState {
            session_id: self.session_id.clone(),
            action,
            current,
        }
    }

    fn log(&self, kind: EventKind, actor: Option<&str>, data: serde_json::Value) {
        self.events.append(&self.session_id, kind, actor, data);
    }

    /// Starts a new recording attempt.
    ///
    /// When consent is required every participant must consent, otherwise
    /// this fails with `ConsentRequired` and nothing changes. A capture
    /// failure leaves the recorder in NOT_RECORDING.
    pub async fn start(&self, request: StartRequest) -> Result<RecordingInfo> {
        let mut state = self.state.lock().await;
        let current = state.info.status;
        if !current.can_start() {
            return Err(self.invalid("start", current));
        }
        if !request.recording_enabled {
            return Err(RecordingError::RecordingDisabled {
                session_id: self.session_id.clone(),
            });
        }
        if request.consent_required {
            let missing = missing_consent(&request.participants_consent);
            if !missing.is_empty() {
                warn!(
                    session_id = %self.session_id,
                    missing = missing.len(),
                    "Recording blocked on consent"
                );
                return Err(RecordingError::ConsentRequired {
                    session_id: self.session_id.clone(),
                    missing,
                });
            }
        }

        let receiver = match self.device.start(self.config.chunk_duration).await {
            Ok(receiver) => receiver,
            Err(e) => {
                state.info = RecordingInfo::idle(&self.session_id);
                state.info.error = Some(e.to_string());
                warn!(session_id = %self.session_id, error = %e, "Capture failed to start");
                return Err(e);
            }
        };

        let mut info = RecordingInfo::idle(&self.session_id);
        info.status = RecordingStatus::Recording;
        info.consent_required = request.consent_required;
        info.participants_consent = request.participants_consent;
        info.started_by = Some(request.requested_by.clone());
        info.start_time = Some(now_millis());

        state.info = info.clone();
        state.receiver = Some(receiver);
        state.paused_by = None;

        self.log(
            EventKind::RecordingStarted,
            Some(&request.requested_by),
            json!({
                "recordingId": info.id,
                "consentRequired": info.consent_required,
                "participants": info.participants_consent.len(),
            }),
        );
        info!(session_id = %self.session_id, recording_id = %info.id, "Recording started");
        Ok(info)
    }

    /// Pauses an active recording.
    pub async fn pause(&self, actor: &str) -> Result<RecordingInfo> {
        let mut state = self.state.lock().await;
        if state.info.status != RecordingStatus::Recording {
            return Err(self.invalid("pause", state.info.status));
        }
        self.pause_locked(&mut state, PauseCause::Manual, Some(actor));
        Ok(state.info.clone())
    }

    /// Resumes a paused recording.
    ///
    /// A recording paused for missing consent resumes only once consent is
    /// complete.
    pub async fn resume(&self, actor: &str) -> Result<RecordingInfo> {
        let mut state = self.state.lock().await;
        if state.info.status != RecordingStatus::Paused {
            return Err(self.invalid("resume", state.info.status));
        }
        if state.info.consent_required {
            let missing = state.info.missing_consent();
            if !missing.is_empty() {
                return Err(RecordingError::ConsentRequired {
                    session_id: self.session_id.clone(),
                    missing,
                });
            }
        }
        self.resume_locked(&mut state, Some(actor));
        Ok(state.info.clone())
    }

    fn pause_locked(&self, state: &mut RecorderState, cause: PauseCause, actor: Option<&str>) {
        self.device.pause();
        state.info.status = RecordingStatus::Paused;
        state.paused_by = Some(cause);
        self.log(
            EventKind::RecordingPaused,
            actor,
            json!({ "recordingId": state.info.id, "reason": cause.as_str() }),
        );
        info!(session_id = %self.session_id, reason = cause.as_str(), "Recording paused");
    }

    fn resume_locked(&self, state: &mut RecorderState, actor: Option<&str>) {
        let cause = state.paused_by.take().unwrap_or(PauseCause::Manual);
        self.device.resume();
        state.info.status = RecordingStatus::Recording;
        self.log(
            EventKind::RecordingResumed,
            actor,
            json!({ "recordingId": state.info.id, "reason": cause.as_str() }),
        );
        info!(session_id = %self.session_id, "Recording resumed");
    }

    /// Stops capture, assembles the chunks and stores the artifact.
    ///
    /// Passes through PROCESSING to READY. If nothing was captured or the
    /// store fails, the attempt ends FAILED.
    pub async fn stop(&self, actor: &str) -> Result<RecordingInfo> {
        let mut state = self.state.lock().await;
        let current = state.info.status;
        if !current.is_capturing() {
            return Err(self.invalid("stop", current));
        }

        self.device.stop();
        let mut chunks = Vec::new();
        if let Some(mut receiver) = state.receiver.take() {
            receiver.close();
            while let Some(chunk) = receiver.recv().await {
                chunks.push(chunk);
            }
        }
        state.paused_by = None;
        state.info.status = RecordingStatus::Processing;
        state.info.end_time = Some(now_millis());
        state.info.chunk_count = chunks.len();
        self.log(
            EventKind::RecordingStopped,
            Some(actor),
            json!({ "recordingId": state.info.id, "chunkCount": chunks.len() }),
        );
        debug!(session_id = %self.session_id, chunks = chunks.len(), "Processing recording");

        let Some(assembled) = assemble(chunks, self.config.thumbnail_fraction) else {
            let err = RecordingError::NoData {
                session_id: self.session_id.clone(),
            };
            self.fail_locked(&mut state, &err);
            return Err(err);
        };

        let stored = self
            .store
            .store(&state.info.id, assembled.data.clone(), assembled.thumbnail.clone())
            .await;
        let artifact = match stored {
            Ok(artifact) => artifact,
            Err(e) => {
                self.fail_locked(&mut state, &e);
                return Err(e);
            }
        };

        let info = &mut state.info;
        info.status = RecordingStatus::Ready;
        info.duration_seconds = Some(assembled.duration_ms / 1000);
        info.file_size_bytes = Some(assembled.data.len() as u64);
        info.url = Some(artifact.url);
        info.thumbnail_url = Some(artifact.thumbnail_url);

        self.log(
            EventKind::RecordingReady,
            Some(actor),
            json!({
                "recordingId": info.id,
                "durationSeconds": info.duration_seconds,
                "fileSizeBytes": info.file_size_bytes,
                "url": info.url,
            }),
        );
        info!(
            session_id = %self.session_id,
            recording_id = %info.id,
            duration_secs = assembled.duration_ms / 1000,
            bytes = assembled.data.len(),
            "Recording ready"
        );
        Ok(info.clone())
    }

    fn fail_locked(&self, state: &mut RecorderState, error: &RecordingError) {
        state.info.status = RecordingStatus::Failed;
        state.info.error = Some(error.to_string());
        self.log(
            EventKind::RecordingAborted,
            None,
            json!({ "recordingId": state.info.id, "reason": error.to_string(), "failed": true }),
        );
        warn!(session_id = %self.session_id, error = %error, "Recording failed");
    }

    /// Abandons the current attempt. Captured chunks are discarded and the
    /// recorder returns to NOT_RECORDING.
    pub async fn abort(&self, reason: &str) -> Result<RecordingInfo> {
        let mut state = self.state.lock().await;
        let current = state.info.status;
        if !current.is_capturing() {
            return Err(self.invalid("abort", current));
        }

        self.device.stop();
        state.receiver = None;
        state.paused_by = None;

        let recording_id = state.info.id.clone();
        state.info = RecordingInfo::idle(&self.session_id);
        state.info.error = Some(reason.to_string());

        self.log(
            EventKind::RecordingAborted,
            None,
            json!({ "recordingId": recording_id, "reason": reason, "failed": false }),
        );
        warn!(session_id = %self.session_id, reason = %reason, "Recording aborted");
        Ok(state.info.clone())
    }

    /// Pauses while the capturing context is hidden and resumes what this
    /// hook paused once it is visible again. Returns the new status when
    /// something changed.
    pub async fn on_visibility_change(&self, visible: bool) -> Option<RecordingStatus> {
        let mut state = self.state.lock().await;
        match (visible, state.info.status, state.paused_by) {
            (false, RecordingStatus::Recording, _) => {
                self.pause_locked(&mut state, PauseCause::Hidden, None);
                Some(RecordingStatus::Paused)
            }
            (true, RecordingStatus::Paused, Some(PauseCause::Hidden)) => {
                if !consent_complete(&state.info) {
                    // Consent was withdrawn while hidden; wait for it instead.
                    state.paused_by = Some(PauseCause::Consent);
                    info!(session_id = %self.session_id, "Recording stays paused for consent");
                    return None;
                }
                self.resume_locked(&mut state, None);
                Some(RecordingStatus::Recording)
            }
            _ => None,
        }
    }

    /// Applies a consent change during a recording.
    ///
    /// A recording that requires consent pauses when someone's consent is
    /// missing, and resumes when a pause caused by missing consent is
    /// resolved.
    pub async fn update_consent(
        &self,
        consent_required: bool,
        participants_consent: BTreeMap<UserId, bool>,
    ) -> Option<RecordingStatus> {
        let mut state = self.state.lock().await;
        if !state.info.status.is_capturing() {
            return None;
        }
        state.info.consent_required = consent_required;
        state.info.participants_consent = participants_consent;
        let complete = consent_complete(&state.info);

        match (complete, state.info.status, state.paused_by) {
            (false, RecordingStatus::Recording, _) => {
                self.pause_locked(&mut state, PauseCause::Consent, None);
                Some(RecordingStatus::Paused)
            }
            (true, RecordingStatus::Paused, Some(PauseCause::Consent)) => {
                self.resume_locked(&mut state, None);
                Some(RecordingStatus::Recording)
            }
            _ => None,
        }
    }
}

fn consent_complete(info: &RecordingInfo) -> bool {
    !info.consent_required || info.missing_consent().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::InMemoryArtifactStore;
    use crate::capture::InMemoryCapture;

    struct Fixture {
        recorder: Recorder,
        device: Arc<InMemoryCapture>,
        store: Arc<InMemoryArtifactStore>,
        events: Arc<EventLog>,
    }

    fn fixture() -> Fixture {
        let device = InMemoryCapture::new();
        let store = Arc::new(InMemoryArtifactStore::new());
        let events = Arc::new(EventLog::new());
        let recorder = Recorder::new(
            "s1",
            RecorderConfig::default(),
            device.clone(),
            store.clone(),
            events.clone(),
        );
        Fixture {
            recorder,
            device,
            store,
            events,
        }
    }

    fn request(consent: &[(&str, bool)]) -> StartRequest {
        StartRequest {
            requested_by: "alice".to_string(),
            recording_enabled: true,
            consent_required: true,
            participants_consent: consent
                .iter()
                .map(|(id, given)| (id.to_string(), *given))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_full_recording() {
        let f = fixture();
        let info = f
            .recorder
            .start(request(&[("alice", true), ("bob", true)]))
            .await
            .unwrap();
        assert_eq!(info.status, RecordingStatus::Recording);
        assert!(info.start_time.is_some());

        f.device.capture(3);
        f.recorder.pause("alice").await.unwrap();
        f.device.capture(5);
        f.recorder.resume("alice").await.unwrap();
        f.device.capture(2);

        let ready = f.recorder.stop("alice").await.unwrap();
        assert_eq!(ready.status, RecordingStatus::Ready);
        // Paused time is excluded.
        assert_eq!(ready.duration_seconds, Some(5));
        assert_eq!(ready.chunk_count, 5);
        assert_eq!(ready.file_size_bytes, Some(5 * 1024));
        assert!(f.store.get(ready.url.as_deref().unwrap()).is_some());
        assert!(f.store.get(ready.thumbnail_url.as_deref().unwrap()).is_some());

        let kinds: Vec<_> = f.events.events("s1").iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::RecordingStarted,
                EventKind::RecordingPaused,
                EventKind::RecordingResumed,
                EventKind::RecordingStopped,
                EventKind::RecordingReady,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_consent_blocks_start() {
        let f = fixture();
        let err = f
            .recorder
            .start(request(&[("alice", true), ("bob", false)]))
            .await
            .unwrap_err();

        match err {
            RecordingError::ConsentRequired { missing, .. } => assert_eq!(missing, vec!["bob"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.recorder.status().await, RecordingStatus::NotRecording);
        assert!(!f.device.is_running());
        assert!(f.events.is_empty());
    }

    #[tokio::test]
    async fn test_consent_not_required() {
        let f = fixture();
        let mut req = request(&[("bob", false)]);
        req.consent_required = false;
        assert!(f.recorder.start(req).await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_recording() {
        let f = fixture();
        let mut req = request(&[]);
        req.recording_enabled = false;
        let err = f.recorder.start(req).await.unwrap_err();
        assert_eq!(err.kind(), "recording_disabled");
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let f = fixture();
        assert_eq!(
            f.recorder.pause("alice").await.unwrap_err().kind(),
            "invalid_state"
        );
        assert_eq!(
            f.recorder.stop("alice").await.unwrap_err().kind(),
            "invalid_state"
        );

        f.recorder.start(request(&[])).await.unwrap();
        assert_eq!(
            f.recorder.resume("alice").await.unwrap_err().kind(),
            "invalid_state"
        );
        assert_eq!(
            f.recorder.start(request(&[])).await.unwrap_err().kind(),
            "invalid_state"
        );
    }

    #[tokio::test]
    async fn test_capture_failure_reverts() {
        let f = fixture();
        f.device.set_unavailable(true);
        let err = f.recorder.start(request(&[])).await.unwrap_err();
        assert_eq!(err.kind(), "capture_unavailable");

        let info = f.recorder.info().await;
        assert_eq!(info.status, RecordingStatus::NotRecording);
        assert!(info.error.is_some());
    }

    #[tokio::test]
    async fn test_abort_discards_chunks() {
        let f = fixture();
        f.recorder.start(request(&[])).await.unwrap();
        f.device.capture(4);

        let info = f.recorder.abort("device unplugged").await.unwrap();
        assert_eq!(info.status, RecordingStatus::NotRecording);
        assert_eq!(info.error.as_deref(), Some("device unplugged"));
        assert!(f.store.is_empty());
        assert!(!f.device.is_running());

        // A new attempt can start afterwards.
        assert!(f.recorder.start(request(&[])).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_recording_fails() {
        let f = fixture();
        f.recorder.start(request(&[])).await.unwrap();
        let err = f.recorder.stop("alice").await.unwrap_err();
        assert_eq!(err.kind(), "no_data");
        assert_eq!(f.recorder.status().await, RecordingStatus::Failed);
        assert!(f.recorder.start(request(&[])).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure() {
        let f = fixture();
        f.store.set_failing(true);
        f.recorder.start(request(&[])).await.unwrap();
        f.device.capture(1);
        let err = f.recorder.stop("alice").await.unwrap_err();
        assert_eq!(err.kind(), "storage");
        assert_eq!(f.recorder.status().await, RecordingStatus::Failed);
    }

    #[tokio::test]
    async fn test_visibility_hook() {
        let f = fixture();
        assert_eq!(f.recorder.on_visibility_change(false).await, None);

        f.recorder.start(request(&[])).await.unwrap();
        assert_eq!(
            f.recorder.on_visibility_change(false).await,
            Some(RecordingStatus::Paused)
        );
        assert_eq!(
            f.recorder.on_visibility_change(true).await,
            Some(RecordingStatus::Recording)
        );

        // A manual pause is not undone by becoming visible.
        f.recorder.pause("alice").await.unwrap();
        assert_eq!(f.recorder.on_visibility_change(true).await, None);
        assert_eq!(f.recorder.status().await, RecordingStatus::Paused);
    }

    #[tokio::test]
    async fn test_consent_revocation_pauses() {
        let f = fixture();
        f.recorder
            .start(request(&[("alice", true), ("bob", true)]))
            .await
            .unwrap();

        let revoked: BTreeMap<_, _> = [("alice".to_string(), true), ("bob".to_string(), false)]
            .into_iter()
            .collect();
        assert_eq!(
            f.recorder.update_consent(true, revoked).await,
            Some(RecordingStatus::Paused)
        );
        assert_eq!(
            f.recorder.resume("alice").await.unwrap_err().kind(),
            "consent_required"
        );

        let restored: BTreeMap<_, _> = [("alice".to_string(), true), ("bob".to_string(), true)]
            .into_iter()
            .collect();
        assert_eq!(
            f.recorder.update_consent(true, restored).await,
            Some(RecordingStatus::Recording)
        );
    }

    #[tokio::test]
    async fn test_hidden_recording_does_not_resume_without_consent() {
        let f = fixture();
        f.recorder
            .start(request(&[("alice", true), ("bob", true)]))
            .await
            .unwrap();
        assert_eq!(
            f.recorder.on_visibility_change(false).await,
            Some(RecordingStatus::Paused)
        );

        let revoked: BTreeMap<_, _> = [("alice".to_string(), true), ("bob".to_string(), false)]
            .into_iter()
            .collect();
        assert_eq!(f.recorder.update_consent(true, revoked).await, None);

        // Visible again, but bob's consent is still missing.
        assert_eq!(f.recorder.on_visibility_change(true).await, None);
        let info = f.recorder.info().await;
        assert_eq!(info.status, RecordingStatus::Paused);
        assert_eq!(info.missing_consent(), vec!["bob"]);

        // Restoring consent resumes the recording.
        let restored: BTreeMap<_, _> = [("alice".to_string(), true), ("bob".to_string(), true)]
            .into_iter()
            .collect();
        assert_eq!(
            f.recorder.update_consent(true, restored).await,
            Some(RecordingStatus::Recording)
        );
    }

    #[tokio::test]
    async fn test_consent_restored_while_hidden_waits_for_visibility() {
        let f = fixture();
        f.recorder
            .start(request(&[("alice", true), ("bob", true)]))
            .await
            .unwrap();
        f.recorder.on_visibility_change(false).await;

        let revoked: BTreeMap<_, _> = [("alice".to_string(), true), ("bob".to_string(), false)]
            .into_iter()
            .collect();
        let restored: BTreeMap<_, _> = [("alice".to_string(), true), ("bob".to_string(), true)]
            .into_iter()
            .collect();
        assert_eq!(f.recorder.update_consent(true, revoked).await, None);
        assert_eq!(f.recorder.update_consent(true, restored).await, None);
        assert_eq!(f.recorder.status().await, RecordingStatus::Paused);

        assert_eq!(
            f.recorder.on_visibility_change(true).await,
            Some(RecordingStatus::Recording)
        );
    }
}
