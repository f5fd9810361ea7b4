//! Composition of the session manager, peer orchestrators and recorders.
//!
//! The node runs one server-side [`PeerOrchestrator`] per session. Every
//! participant connects to it; proposals arriving over the data channel
//! are committed through the session's sequencing authority and each
//! committed operation is relayed back to every connected participant.
//! Peer events are folded into participant connection status, and consent
//! changes are pushed into the session's recorder.

use duet_peer::{DataFrame, PeerCapabilities, PeerEvent, PeerOrchestrator};
use duet_realtime::EventLog;
use duet_recording::{
    ArtifactStore, CaptureDevice, InMemoryArtifactStore, InMemoryCapture, Recorder, RecordingInfo,
    RecordingStatus, StartRequest,
};
use duet_session::{
    ConnectionControl, ConnectionStatus, Participant, PermissionLevel, Session, SessionError,
    SessionManager, SessionType, SettingsOverride,
};
use duet_types::{SessionId, UserIdentity};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;

/// Peer id of the node's own end of every session connection.
pub const SERVER_PEER_ID: &str = "duet-server";

/// Creates the capture device for one session.
pub type CaptureFactory = Arc<dyn Fn(&str) -> Arc<dyn CaptureDevice> + Send + Sync>;

/// Platform adapters the node runs on.
#[derive(Clone)]
pub struct NodeCapabilities {
    pub peers: PeerCapabilities,
    pub capture: CaptureFactory,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl NodeCapabilities {
    /// In-process adapters over a loopback network.
    pub fn loopback(network: &Arc<duet_peer::LoopbackNetwork>) -> Self {
        Self {
            peers: PeerCapabilities {
                links: network.link_factory(),
                signaling: network.signaling(),
                media: duet_peer::LoopbackMedia::new(),
            },
            capture: Arc::new(|_: &str| -> Arc<dyn CaptureDevice> { InMemoryCapture::new() }),
            artifacts: Arc::new(InMemoryArtifactStore::new()),
        }
    }
}

/// Server-side orchestrators, one per session.
#[derive(Default)]
struct PeerRegistry {
    servers: RwLock<HashMap<SessionId, Arc<PeerOrchestrator>>>,
}

impl PeerRegistry {
    fn get(&self, session_id: &str) -> Option<Arc<PeerOrchestrator>> {
        self.servers.read().get(session_id).cloned()
    }
}

impl ConnectionControl for PeerRegistry {
    fn close_participant(&self, session_id: &str, user_id: &str) {
        if let Some(server) = self.get(session_id) {
            server.close_peer(user_id);
        }
    }

    fn close_session(&self, session_id: &str) {
        let removed = self.servers.write().remove(session_id);
        if let Some(server) = removed {
            server.shutdown();
        }
    }
}

/// The composed node.
pub struct DuetService {
    config: NodeConfig,
    capabilities: NodeCapabilities,
    events: Arc<EventLog>,
    sessions: Arc<SessionManager>,
    peers: Arc<PeerRegistry>,
    recorders: Mutex<HashMap<SessionId, Arc<Recorder>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DuetService {
    pub fn new(config: NodeConfig, capabilities: NodeCapabilities) -> Result<Self, NodeError> {
        config.validate()?;

        let events = Arc::new(EventLog::new());
        let peers = Arc::new(PeerRegistry::default());
        let sessions = Arc::new(
            SessionManager::new(config.session_manager_config(), events.clone())
                .with_connection_control(peers.clone()),
        );

        info!(base_url = %config.base_url, "Duet service created");
        Ok(Self {
            config,
            capabilities,
            events,
            sessions,
            peers,
            recorders: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &NodeCapabilities {
        &self.capabilities
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    // ==================== Sessions ====================

    /// Creates a session and brings up its server-side peer.
    ///
    /// Sessions that do not set an autosave interval get the configured
    /// default. Must be called inside a tokio runtime.
    pub fn open_session(
        &self,
        owner: &UserIdentity,
        title: &str,
        session_type: SessionType,
        overrides: &SettingsOverride,
    ) -> Result<Session, NodeError> {
        let mut overrides = overrides.clone();
        overrides
            .autosave_interval_secs
            .get_or_insert(self.config.session.default_autosave_secs);

        let session = self
            .sessions
            .create_session(owner, title, session_type, &overrides)?;
        self.server(&session.id)?;
        Ok(session)
    }

    /// Joins a session and re-evaluates recording consent.
    pub async fn join_session(
        &self,
        session_id: &str,
        user: &UserIdentity,
        invite_code: Option<&str>,
    ) -> Result<Participant, NodeError> {
        let participant = self.sessions.join_session(session_id, user, invite_code)?;
        self.sync_consent(session_id).await;
        Ok(participant)
    }

    /// Leaves a session. The participant's connection is closed by the
    /// session manager.
    pub async fn leave_session(&self, session_id: &str, user_id: &str) -> Result<(), NodeError> {
        self.sessions.leave_session(session_id, user_id)?;
        self.sync_consent(session_id).await;
        Ok(())
    }

    /// Ends a session, finishing any recording in progress first.
    pub async fn end_session(&self, session_id: &str, user_id: &str) -> Result<Session, NodeError> {
        // Authorization is checked before the recording is touched.
        let actor = self.sessions.participant(session_id, user_id)?;
        if !actor.permission.is_admin() {
            return Err(SessionError::InsufficientPermission {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                required: PermissionLevel::Admin,
            }
            .into());
        }

        if let Some(recorder) = self.recorder_if_exists(session_id) {
            if recorder.status().await.is_capturing() {
                if let Err(e) = recorder.stop(user_id).await {
                    warn!(session_id = %session_id, error = %e, "Recording did not finish cleanly");
                }
            }
        }

        let session = self.sessions.end_session(session_id, user_id)?;
        Ok(session)
    }

    pub async fn set_recording_consent(
        &self,
        session_id: &str,
        user_id: &str,
        consent: bool,
    ) -> Result<(), NodeError> {
        self.sessions
            .set_recording_consent(session_id, user_id, consent)?;
        self.sync_consent(session_id).await;
        Ok(())
    }

    // ==================== Peers ====================

    /// The session's server-side orchestrator, created on first use.
    pub fn server(&self, session_id: &str) -> Result<Arc<PeerOrchestrator>, NodeError> {
        let session = self.sessions.get_session(session_id)?;
        if session.status.is_over() {
            return Err(SessionError::SessionEnded {
                session_id: session_id.to_string(),
            }
            .into());
        }

        let mut servers = self.peers.servers.write();
        if let Some(server) = servers.get(session_id) {
            return Ok(server.clone());
        }

        let (server, peer_events) = PeerOrchestrator::new(
            session_id,
            SERVER_PEER_ID,
            self.config.orchestrator_config(),
            self.capabilities.peers.clone(),
        );
        let commits = self.sessions.subscribe_operations(session_id)?;

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(pump_peer_events(
            session_id.to_string(),
            self.sessions.clone(),
            Arc::downgrade(&server),
            peer_events,
        )));
        tasks.push(tokio::spawn(relay_commits(
            session_id.to_string(),
            Arc::downgrade(&server),
            commits,
        )));
        tasks.push(server.spawn_monitor());

        servers.insert(session_id.to_string(), server.clone());
        info!(session_id = %session_id, "Session peer started");
        Ok(server)
    }

    /// Answers a participant's connection offer.
    pub async fn accept_peer(&self, session_id: &str, user_id: &str) -> Result<(), NodeError> {
        self.sessions.participant(session_id, user_id)?;
        let server = self.server(session_id)?;
        server.answer(user_id).await?;
        Ok(())
    }

    // ==================== Recording ====================

    fn recorder_if_exists(&self, session_id: &str) -> Option<Arc<Recorder>> {
        self.recorders.lock().get(session_id).cloned()
    }

    fn recorder(&self, session_id: &str) -> Arc<Recorder> {
        self.recorders
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Recorder::new(
                    session_id,
                    self.config.recorder_config(),
                    (self.capabilities.capture)(session_id),
                    self.capabilities.artifacts.clone(),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    /// Only admins and the owner control recording.
    fn require_recording_control(&self, session_id: &str, user_id: &str) -> Result<(), NodeError> {
        let participant = self.sessions.participant(session_id, user_id)?;
        if participant.permission.is_admin() {
            Ok(())
        } else {
            Err(SessionError::InsufficientPermission {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                required: PermissionLevel::Admin,
            }
            .into())
        }
    }

    /// Starts recording with the session's current consent.
    pub async fn start_recording(&self, session_id: &str, user_id: &str) -> Result<RecordingInfo, NodeError> {
        self.require_recording_control(session_id, user_id)?;
        let snapshot = self.sessions.consent_snapshot(session_id)?;
        let info = self
            .recorder(session_id)
            .start(StartRequest {
                requested_by: user_id.to_string(),
                recording_enabled: snapshot.recording_enabled,
                consent_required: snapshot.consent_required,
                participants_consent: snapshot.participants,
            })
            .await?;
        Ok(info)
    }

    pub async fn pause_recording(&self, session_id: &str, user_id: &str) -> Result<RecordingInfo, NodeError> {
        self.require_recording_control(session_id, user_id)?;
        Ok(self.recorder(session_id).pause(user_id).await?)
    }

    pub async fn resume_recording(&self, session_id: &str, user_id: &str) -> Result<RecordingInfo, NodeError> {
        self.require_recording_control(session_id, user_id)?;
        Ok(self.recorder(session_id).resume(user_id).await?)
    }

    pub async fn stop_recording(&self, session_id: &str, user_id: &str) -> Result<RecordingInfo, NodeError> {
        self.require_recording_control(session_id, user_id)?;
        Ok(self.recorder(session_id).stop(user_id).await?)
    }

    pub async fn abort_recording(
        &self,
        session_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<RecordingInfo, NodeError> {
        self.require_recording_control(session_id, user_id)?;
        Ok(self.recorder(session_id).abort(reason).await?)
    }

    /// Forwards a visibility change of the capturing context.
    pub async fn on_visibility_change(&self, session_id: &str, visible: bool) -> Option<RecordingStatus> {
        let recorder = self.recorder_if_exists(session_id)?;
        recorder.on_visibility_change(visible).await
    }

    pub async fn recording_info(&self, session_id: &str) -> Result<RecordingInfo, NodeError> {
        self.sessions.get_session(session_id)?;
        Ok(self.recorder(session_id).info().await)
    }

    /// Pushes the current consent picture into a running recording.
    async fn sync_consent(&self, session_id: &str) {
        let Some(recorder) = self.recorder_if_exists(session_id) else {
            return;
        };
        let Ok(snapshot) = self.sessions.consent_snapshot(session_id) else {
            return;
        };
        if let Some(status) = recorder
            .update_consent(snapshot.consent_required, snapshot.participants)
            .await
        {
            info!(session_id = %session_id, status = %status, "Recording adjusted to consent change");
        }
    }

    // ==================== Teardown ====================

    /// Closes every session peer and stops background tasks.
    pub fn shutdown(&self) {
        let servers: Vec<_> = self.peers.servers.write().drain().collect();
        for (_, server) in &servers {
            server.shutdown();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(sessions = servers.len(), "Duet service shut down");
    }
}

/// Folds one session's peer events into the session manager.
async fn pump_peer_events(
    session_id: String,
    sessions: Arc<SessionManager>,
    server: Weak<PeerOrchestrator>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        let status = match &event {
            PeerEvent::Connected { .. } | PeerEvent::Restored { .. } => Some(ConnectionStatus::Connected),
            PeerEvent::Disconnected { .. } | PeerEvent::Reconnecting { .. } => {
                Some(ConnectionStatus::Reconnecting)
            }
            PeerEvent::ConnectionLost { .. } => Some(ConnectionStatus::Disconnected),
            PeerEvent::QualityChanged { peer_id, from, to } => {
                debug!(session_id = %session_id, user_id = %peer_id, from = ?from, to = %to, "Peer quality changed");
                None
            }
            PeerEvent::Closed { .. } => None,
            PeerEvent::FrameReceived { peer_id, frame } => {
                let Some(server) = server.upgrade() else { break };
                handle_frame(&session_id, &sessions, &server, peer_id, frame);
                None
            }
        };

        if let Some(status) = status {
            let peer_id = event.peer_id();
            if let Err(e) = sessions.set_connection_status(&session_id, peer_id, status) {
                // The participant may already have left.
                debug!(session_id = %session_id, user_id = %peer_id, error = %e, "Status update skipped");
            }
        }
    }
    debug!(session_id = %session_id, "Peer event pump stopped");
}

fn handle_frame(
    session_id: &str,
    sessions: &SessionManager,
    server: &PeerOrchestrator,
    peer_id: &str,
    frame: &DataFrame,
) {
    match frame {
        DataFrame::Operation {
            operation,
            version: None,
            ..
        } => {
            if operation.author_id != peer_id {
                warn!(
                    session_id = %session_id,
                    peer_id = %peer_id,
                    author_id = %operation.author_id,
                    "Dropping operation authored for another participant"
                );
                return;
            }
            match sessions.submit_operation(session_id, operation.clone()) {
                Ok(committed) => {
                    debug!(session_id = %session_id, version = committed.version, "Proposal committed");
                }
                Err(e) => {
                    warn!(session_id = %session_id, user_id = %peer_id, kind = e.kind(), error = %e, "Proposal rejected");
                }
            }
        }
        DataFrame::Operation { .. } => {
            warn!(session_id = %session_id, peer_id = %peer_id, "Ignoring committed frame from a participant");
        }
        DataFrame::Chat(message) => {
            if message.user_id != peer_id {
                warn!(session_id = %session_id, peer_id = %peer_id, "Dropping chat sent for another participant");
                return;
            }
            match sessions.send_chat(session_id, peer_id, &message.text) {
                Ok(stored) => {
                    if let Err(e) = server.publish(&DataFrame::chat(stored)) {
                        debug!(session_id = %session_id, error = %e, "Chat relay skipped");
                    }
                }
                Err(e) => {
                    warn!(session_id = %session_id, user_id = %peer_id, kind = e.kind(), error = %e, "Chat rejected");
                }
            }
        }
    }
}

/// Relays every committed operation of a session to its participants.
async fn relay_commits(
    session_id: String,
    server: Weak<PeerOrchestrator>,
    mut commits: broadcast::Receiver<duet_ot::CommittedOperation>,
) {
    loop {
        let committed = match commits.recv().await {
            Ok(committed) => committed,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Participants recover the gap through catch-up.
                warn!(session_id = %session_id, skipped, "Commit relay lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(server) = server.upgrade() else { break };
        let frame = DataFrame::committed(session_id.as_str(), &committed);
        // Queued per participant; a slow link delays only its own queue.
        match server.publish(&frame) {
            Ok(queued) => {
                debug!(session_id = %session_id, version = committed.version, queued, "Commit relayed");
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Commit relay stopped");
                break;
            }
        }
    }
    debug!(session_id = %session_id, "Commit relay stopped");
}
