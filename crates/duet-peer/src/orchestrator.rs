//! Peer connection orchestration.
//!
//! A [`PeerOrchestrator`] holds every connection of one local participant
//! in one session. It negotiates links through the signaling relay, relays
//! data-channel frames, samples connection quality and renegotiates
//! degraded or lost connections with exponential backoff before reporting
//! them lost.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState};
use crate::error::PeerError;
use crate::frame::DataFrame;
use crate::link::{InboundFrame, PeerLink, PeerLinkFactory};
use crate::media::{LocalMedia, MediaKind, MediaSource, MediaTrack};
use crate::quality::{QualityMonitor, QualityThresholds, QualityTier, QualityVerdict};
use crate::reconnect::ReconnectPolicy;
use crate::signaling::{SignalKind, SignalingChannel, SignalingMessage};
use crate::Result;

/// Orchestrator timing and thresholds.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on each wait for an offer, answer or candidate.
    pub signaling_timeout: Duration,
    /// Bound on reaching CONNECTED after negotiation, and on each
    /// reconnection attempt.
    pub connect_timeout: Duration,
    /// Bound on a single frame send.
    pub send_timeout: Duration,
    /// Interval between quality samples.
    pub sample_interval: Duration,
    /// How long a connection may stay POOR before it is renegotiated.
    pub poor_quality_grace: Duration,
    pub reconnect: ReconnectPolicy,
    pub thresholds: QualityThresholds,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            signaling_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(5),
            sample_interval: Duration::from_secs(2),
            poor_quality_grace: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            thresholds: QualityThresholds::default(),
        }
    }
}

/// Notifications emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Connected { peer_id: String },
    /// Transient loss; reconnection follows.
    Disconnected { peer_id: String, reason: String },
    Reconnecting { peer_id: String, attempt: u32 },
    Restored { peer_id: String },
    QualityChanged {
        peer_id: String,
        from: Option<QualityTier>,
        to: QualityTier,
    },
    /// Every reconnection attempt failed.
    ConnectionLost { peer_id: String },
    Closed { peer_id: String },
    FrameReceived { peer_id: String, frame: DataFrame },
}

impl PeerEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            PeerEvent::Connected { peer_id }
            | PeerEvent::Disconnected { peer_id, .. }
            | PeerEvent::Reconnecting { peer_id, .. }
            | PeerEvent::Restored { peer_id }
            | PeerEvent::QualityChanged { peer_id, .. }
            | PeerEvent::ConnectionLost { peer_id }
            | PeerEvent::Closed { peer_id }
            | PeerEvent::FrameReceived { peer_id, .. } => peer_id,
        }
    }
}

/// Platform adapters used by an orchestrator.
#[derive(Clone)]
pub struct PeerCapabilities {
    pub links: Arc<dyn PeerLinkFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub media: Arc<dyn MediaSource>,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// A frame waiting in a peer's outbound queue.
struct Outbound {
    payload: String,
    delivered: Option<oneshot::Sender<Result<()>>>,
}

struct PeerEntry {
    link: Arc<dyn PeerLink>,
    connection: Mutex<Connection>,
    monitor: Mutex<QualityMonitor>,
    reconnecting: AtomicBool,
    /// Frames to this peer, sent in order by the peer's own sender task.
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl PeerEntry {
    fn state(&self) -> ConnectionState {
        self.connection.lock().state
    }

    fn remote_id(&self) -> &str {
        self.link.remote_id()
    }

    fn enqueue(&self, payload: String, delivered: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
        self.outbound
            .send(Outbound { payload, delivered })
            .map_err(|_| PeerError::Transport {
                peer_id: self.remote_id().to_string(),
                reason: "send queue closed".to_string(),
            })
    }

    /// Moves a CONNECTED peer to DISCONNECTED and reports it. Returns false
    /// if it was not connected.
    fn disconnect(&self, session_id: &str, reason: &str, events: &mpsc::UnboundedSender<PeerEvent>) -> bool {
        {
            let mut connection = self.connection.lock();
            if connection.state != ConnectionState::Connected {
                return false;
            }
            if connection.transition(ConnectionState::Disconnected).is_err() {
                return false;
            }
        }

        warn!(
            session_id = %session_id,
            remote_id = %self.remote_id(),
            reason = %reason,
            "Peer disconnected"
        );
        // The receiver may be gone during shutdown.
        let _ = events.send(PeerEvent::Disconnected {
            peer_id: self.remote_id().to_string(),
            reason: reason.to_string(),
        });
        true
    }
}

/// What a peer's sender task needs from its orchestrator.
#[derive(Clone)]
struct SendContext {
    session_id: String,
    send_timeout: Duration,
    events: mpsc::UnboundedSender<PeerEvent>,
}

/// Manages the connections of one local participant.
pub struct PeerOrchestrator {
    session_id: String,
    local_id: String,
    config: OrchestratorConfig,
    capabilities: PeerCapabilities,
    peers: RwLock<HashMap<String, Arc<PeerEntry>>>,
    media: Mutex<LocalMedia>,
    events: mpsc::UnboundedSender<PeerEvent>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    shut_down: AtomicBool,
}

impl PeerOrchestrator {
    /// Creates an orchestrator and the stream of its events.
    ///
    /// Must be called inside a tokio runtime: a task decoding inbound
    /// frames is spawned here.
    pub fn new(
        session_id: impl Into<String>,
        local_id: impl Into<String>,
        config: OrchestratorConfig,
        capabilities: PeerCapabilities,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        let orchestrator = Arc::new(Self {
            session_id: session_id.into(),
            local_id: local_id.into(),
            config,
            capabilities,
            peers: RwLock::new(HashMap::new()),
            media: Mutex::new(LocalMedia::default()),
            events,
            inbound,
            shut_down: AtomicBool::new(false),
        });

        tokio::spawn(decode_inbound(Arc::downgrade(&orchestrator), inbound_rx));
        (orchestrator, events_rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn emit(&self, event: PeerEvent) {
        // The receiver may be gone during shutdown.
        let _ = self.events.send(event);
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }
        Ok(())
    }

    fn entry(&self, peer_id: &str) -> Result<Arc<PeerEntry>> {
        self.peers
            .read()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| PeerError::PeerNotFound(peer_id.to_string()))
    }

    // ==================== Negotiation ====================

    /// Connects to `remote_id` as the offering side.
    pub async fn connect(&self, remote_id: &str) -> Result<()> {
        self.ensure_running()?;
        let entry = self.prepare(remote_id).await?;
        let result = self.negotiate_offer(&entry).await;
        self.finish_negotiation(remote_id, &entry, result)
    }

    /// Waits for an offer from `remote_id` and answers it.
    pub async fn answer(&self, remote_id: &str) -> Result<()> {
        self.ensure_running()?;
        let offer = self.await_signal(remote_id, SignalKind::Offer).await?;
        let entry = self.prepare(remote_id).await?;
        let result = self.negotiate_answer(&entry, &offer).await;
        self.finish_negotiation(remote_id, &entry, result)
    }

    /// Creates a link in CONNECTING. A FAILED connection is replaced, any
    /// other existing connection is kept.
    async fn prepare(&self, remote_id: &str) -> Result<Arc<PeerEntry>> {
        if remote_id == self.local_id {
            return Err(PeerError::Signaling {
                peer_id: remote_id.to_string(),
                reason: "cannot connect to self".to_string(),
            });
        }
        if let Some(existing) = self.peers.read().get(remote_id) {
            if existing.state() != ConnectionState::Failed {
                return Err(PeerError::AlreadyConnected(remote_id.to_string()));
            }
        }

        let media = self.media.lock().clone();
        let link = self
            .capabilities
            .links
            .create(&self.local_id, remote_id, &media, self.inbound.clone())
            .await?;

        let mut connection = Connection::new(&self.local_id, remote_id);
        connection.transition(ConnectionState::Connecting)?;
        let (outbound, queue) = mpsc::unbounded_channel();
        let entry = Arc::new(PeerEntry {
            link: link.clone(),
            connection: Mutex::new(connection),
            monitor: Mutex::new(QualityMonitor::new(self.config.poor_quality_grace)),
            reconnecting: AtomicBool::new(false),
            outbound,
        });
        tokio::spawn(drain_outbound(
            Arc::downgrade(&entry),
            queue,
            SendContext {
                session_id: self.session_id.clone(),
                send_timeout: self.config.send_timeout,
                events: self.events.clone(),
            },
        ));

        let replaced = {
            let mut peers = self.peers.write();
            let occupied = peers
                .get(remote_id)
                .map_or(false, |existing| existing.state() != ConnectionState::Failed);
            if occupied {
                None
            } else {
                Some(peers.insert(remote_id.to_string(), entry.clone()))
            }
        };
        match replaced {
            None => {
                link.close();
                Err(PeerError::AlreadyConnected(remote_id.to_string()))
            }
            Some(previous) => {
                if let Some(previous) = previous {
                    previous.link.close();
                }
                debug!(local_id = %self.local_id, remote_id = %remote_id, "Connecting");
                Ok(entry)
            }
        }
    }

    async fn negotiate_offer(&self, entry: &PeerEntry) -> Result<()> {
        let remote_id = entry.link.remote_id().to_string();
        let offer = entry.link.create_offer().await?;
        self.signal(&remote_id, SignalKind::Offer, offer).await?;

        let answer = self.await_signal(&remote_id, SignalKind::Answer).await?;
        entry.link.apply_answer(&answer.payload).await?;

        self.exchange_candidates(entry, &remote_id).await?;
        self.await_connected(entry, &remote_id).await
    }

    async fn negotiate_answer(&self, entry: &PeerEntry, offer: &SignalingMessage) -> Result<()> {
        let remote_id = offer.from_peer_id.clone();
        let answer = entry.link.accept_offer(&offer.payload).await?;
        self.signal(&remote_id, SignalKind::Answer, answer).await?;

        self.exchange_candidates(entry, &remote_id).await?;
        self.await_connected(entry, &remote_id).await
    }

    /// Sends every local candidate, then waits for at least one remote one.
    async fn exchange_candidates(&self, entry: &PeerEntry, remote_id: &str) -> Result<()> {
        for candidate in entry.link.local_candidates().await? {
            self.signal(remote_id, SignalKind::IceCandidate, candidate)
                .await?;
        }
        let remote = self.await_signal(remote_id, SignalKind::IceCandidate).await?;
        entry.link.add_candidate(&remote.payload).await
    }

    async fn signal(&self, remote_id: &str, kind: SignalKind, payload: String) -> Result<()> {
        let message =
            SignalingMessage::new(&self.session_id, &self.local_id, remote_id, kind, payload);
        self.capabilities.signaling.send(message).await
    }

    async fn await_signal(&self, remote_id: &str, kind: SignalKind) -> Result<SignalingMessage> {
        let receive = self
            .capabilities
            .signaling
            .recv(&self.local_id, remote_id, kind);
        with_timeout(self.config.signaling_timeout, remote_id, "signaling", receive).await
    }

    async fn await_connected(&self, entry: &PeerEntry, remote_id: &str) -> Result<()> {
        with_timeout(
            self.config.connect_timeout,
            remote_id,
            "connect",
            entry.link.wait_connected(),
        )
        .await
    }

    fn finish_negotiation(
        &self,
        remote_id: &str,
        entry: &PeerEntry,
        result: Result<()>,
    ) -> Result<()> {
        let mut connection = entry.connection.lock();
        if connection.state == ConnectionState::Closed {
            return Err(PeerError::Closed);
        }

        match result {
            Ok(()) => {
                connection.transition(ConnectionState::Connected)?;
                drop(connection);
                info!(
                    session_id = %self.session_id,
                    local_id = %self.local_id,
                    remote_id = %remote_id,
                    "Peer connected"
                );
                self.emit(PeerEvent::Connected {
                    peer_id: remote_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                connection.transition(ConnectionState::Failed)?;
                drop(connection);
                warn!(
                    session_id = %self.session_id,
                    remote_id = %remote_id,
                    error = %e,
                    "Negotiation failed"
                );
                Err(e)
            }
        }
    }

    // ==================== Data channel ====================

    /// Sends a frame to one connected peer and waits until it is on the
    /// wire.
    ///
    /// Frames to a peer leave in the order they were queued, whichever of
    /// [`send_to`](Self::send_to), [`broadcast`](Self::broadcast) or
    /// [`publish`](Self::publish) queued them.
    pub async fn send_to(&self, remote_id: &str, frame: &DataFrame) -> Result<()> {
        let entry = self.entry(remote_id)?;
        let state = entry.state();
        if !state.is_open() {
            return Err(PeerError::Transport {
                peer_id: remote_id.to_string(),
                reason: format!("connection is {}", state),
            });
        }
        let (done, delivered) = oneshot::channel();
        entry.enqueue(frame.encode()?, Some(done))?;
        delivered.await.unwrap_or(Err(PeerError::Closed))
    }

    fn open_entries(&self) -> Vec<(String, Arc<PeerEntry>)> {
        self.peers
            .read()
            .iter()
            .filter(|(_, entry)| entry.state().is_open())
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    /// Sends a frame to every connected peer and waits for each outcome.
    ///
    /// A failed send marks only that connection DISCONNECTED.
    pub async fn broadcast(&self, frame: &DataFrame) -> Result<BroadcastReport> {
        self.ensure_running()?;
        let payload = frame.encode()?;

        let mut pending = Vec::new();
        let mut report = BroadcastReport::default();
        for (id, entry) in self.open_entries() {
            let (done, delivered) = oneshot::channel();
            match entry.enqueue(payload.clone(), Some(done)) {
                Ok(()) => pending.push((id, delivered)),
                Err(_) => report.failed.push(id),
            }
        }

        let outcomes = join_all(pending.into_iter().map(|(id, delivered)| async move {
            (id, delivered.await.unwrap_or(Err(PeerError::Closed)))
        }))
        .await;
        for (id, result) in outcomes {
            match result {
                Ok(()) => report.delivered.push(id),
                Err(_) => report.failed.push(id),
            }
        }
        report.delivered.sort();
        report.failed.sort();

        debug!(
            session_id = %self.session_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Frame broadcast"
        );
        Ok(report)
    }

    /// Queues a frame for every connected peer without waiting for delivery.
    /// Returns how many peers it was queued for.
    ///
    /// A slow or stalled peer delays only its own queue. Send failures mark
    /// that connection DISCONNECTED.
    pub fn publish(&self, frame: &DataFrame) -> Result<usize> {
        self.ensure_running()?;
        let payload = frame.encode()?;
        let queued = self
            .open_entries()
            .into_iter()
            .filter(|(_, entry)| entry.enqueue(payload.clone(), None).is_ok())
            .count();
        debug!(session_id = %self.session_id, queued, "Frame published");
        Ok(queued)
    }

    /// Moves a CONNECTED peer to DISCONNECTED. Returns false if it was not
    /// connected.
    pub fn mark_disconnected(&self, remote_id: &str, reason: &str) -> bool {
        match self.entry(remote_id) {
            Ok(entry) => entry.disconnect(&self.session_id, reason, &self.events),
            Err(_) => false,
        }
    }

    // ==================== Quality & reconnection ====================

    /// Samples and classifies one connection.
    pub async fn sample_quality(&self, remote_id: &str) -> Result<QualityVerdict> {
        let entry = self.entry(remote_id)?;
        if !entry.state().is_open() {
            return Ok(QualityVerdict::Steady);
        }

        let stats = match entry.link.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                self.mark_disconnected(remote_id, &e.to_string());
                return Err(e);
            }
        };
        let tier = self.config.thresholds.classify(&stats);
        {
            let mut connection = entry.connection.lock();
            connection.stats = Some(stats);
            connection.quality = Some(tier);
        }

        let verdict = entry.monitor.lock().observe(tier, Instant::now());
        match verdict {
            QualityVerdict::Changed { from, to } => {
                debug!(remote_id = %remote_id, from = ?from, to = %to, "Quality changed");
                self.emit(PeerEvent::QualityChanged {
                    peer_id: remote_id.to_string(),
                    from,
                    to,
                });
            }
            QualityVerdict::Renegotiate => {
                warn!(
                    remote_id = %remote_id,
                    grace_ms = self.config.poor_quality_grace.as_millis() as u64,
                    "Quality poor past grace window"
                );
            }
            QualityVerdict::Steady => {}
        }
        Ok(verdict)
    }

    /// Renegotiates a degraded or lost connection with exponential backoff.
    ///
    /// Returns true when the connection was restored. After the last failed
    /// attempt the connection becomes FAILED and `ConnectionLost` is
    /// emitted. Returns false without doing anything when a reconnection is
    /// already running.
    pub async fn reconnect(&self, remote_id: &str) -> Result<bool> {
        let entry = self.entry(remote_id)?;
        if entry
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }

        let result = self.run_reconnect(remote_id, &entry).await;
        entry.reconnecting.store(false, Ordering::SeqCst);
        result
    }

    async fn run_reconnect(&self, remote_id: &str, entry: &PeerEntry) -> Result<bool> {
        match entry.state() {
            ConnectionState::Connected => {
                self.mark_disconnected(remote_id, "renegotiating degraded connection");
            }
            ConnectionState::Disconnected => {}
            _ => return Ok(false),
        }

        let policy = &self.config.reconnect;
        for attempt in 1..=policy.max_attempts {
            entry.connection.lock().reconnect_attempts = attempt;
            self.emit(PeerEvent::Reconnecting {
                peer_id: remote_id.to_string(),
                attempt,
            });
            tokio::time::sleep(policy.delay_for_attempt(attempt)).await;

            if entry.state() != ConnectionState::Disconnected {
                // Closed while waiting.
                return Ok(false);
            }

            let restart = async {
                entry.link.restart().await?;
                entry.link.wait_connected().await
            };
            match with_timeout(self.config.connect_timeout, remote_id, "reconnect", restart).await {
                Ok(()) => {
                    if entry
                        .connection
                        .lock()
                        .transition(ConnectionState::Connected)
                        .is_err()
                    {
                        return Ok(false);
                    }
                    entry.monitor.lock().reset();
                    info!(remote_id = %remote_id, attempt, "Peer connection restored");
                    self.emit(PeerEvent::Restored {
                        peer_id: remote_id.to_string(),
                    });
                    return Ok(true);
                }
                Err(e) => {
                    warn!(
                        remote_id = %remote_id,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Reconnection attempt failed"
                    );
                }
            }
        }

        if entry
            .connection
            .lock()
            .transition(ConnectionState::Failed)
            .is_err()
        {
            return Ok(false);
        }
        warn!(
            session_id = %self.session_id,
            remote_id = %remote_id,
            "Peer connection lost"
        );
        self.emit(PeerEvent::ConnectionLost {
            peer_id: remote_id.to_string(),
        });
        Ok(false)
    }

    /// One monitoring pass: samples connected peers and starts reconnection
    /// for degraded or disconnected ones in background tasks.
    pub async fn tick(self: &Arc<Self>) {
        let peers: Vec<(String, ConnectionState)> = self
            .peers
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state()))
            .collect();

        for (peer_id, state) in peers {
            let needs_reconnect = match state {
                ConnectionState::Connected => matches!(
                    self.sample_quality(&peer_id).await,
                    Ok(QualityVerdict::Renegotiate) | Err(_)
                ),
                ConnectionState::Disconnected => true,
                _ => false,
            };

            if needs_reconnect {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.reconnect(&peer_id).await {
                        debug!(remote_id = %peer_id, error = %e, "Reconnect skipped");
                    }
                });
            }
        }
    }

    /// Runs [`PeerOrchestrator::tick`] every sample interval until shutdown.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::downgrade(self);
        let period = self.config.sample_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(this) = this.upgrade() else { break };
                if this.shut_down.load(Ordering::SeqCst) {
                    break;
                }
                this.tick().await;
            }
        })
    }

    // ==================== Media ====================

    /// Acquires local capture tracks.
    pub async fn acquire_media(&self, kinds: &[MediaKind]) -> Result<LocalMedia> {
        for kind in kinds {
            if *kind == MediaKind::Screen {
                continue;
            }
            let track = self.capabilities.media.acquire(*kind).await?;
            let previous = self.media.lock().track_mut(*kind).replace(track);
            if let Some(previous) = previous {
                self.capabilities.media.release(&previous);
            }
        }
        Ok(self.local_media())
    }

    /// Enables or mutes a local track. Connections are left untouched.
    pub fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<()> {
        let mut media = self.media.lock();
        let track = media
            .track_mut(kind)
            .as_mut()
            .ok_or_else(|| PeerError::MediaUnavailable(kind.to_string()))?;
        track.enabled = enabled;
        debug!(local_id = %self.local_id, kind = %kind, enabled, "Track toggled");
        Ok(())
    }

    /// Starts screen sharing by substituting the outgoing video track on
    /// every connected peer. Returns how many connections were updated.
    pub async fn start_screen_share(&self) -> Result<usize> {
        self.ensure_running()?;
        let track = self.capabilities.media.acquire(MediaKind::Screen).await?;
        let previous = self.media.lock().screen.replace(track.clone());
        if let Some(previous) = previous {
            self.capabilities.media.release(&previous);
        }

        let updated = self.replace_video(Some(&track)).await;
        info!(local_id = %self.local_id, peers = updated, "Screen sharing started");
        Ok(updated)
    }

    /// Stops screen sharing and restores the camera track.
    pub async fn stop_screen_share(&self) -> Result<usize> {
        let (screen, camera) = {
            let mut media = self.media.lock();
            (media.screen.take(), media.camera.clone())
        };
        let Some(screen) = screen else {
            return Ok(0);
        };
        self.capabilities.media.release(&screen);

        let updated = self.replace_video(camera.as_ref()).await;
        info!(local_id = %self.local_id, peers = updated, "Screen sharing stopped");
        Ok(updated)
    }

    async fn replace_video(&self, track: Option<&MediaTrack>) -> usize {
        let links: Vec<Arc<dyn PeerLink>> = self
            .peers
            .read()
            .values()
            .filter(|entry| entry.state().is_open())
            .map(|entry| entry.link.clone())
            .collect();

        let results = join_all(links.iter().map(|link| link.replace_video_track(track))).await;
        results
            .into_iter()
            .zip(&links)
            .filter(|(result, link)| match result {
                Ok(()) => true,
                Err(e) => {
                    warn!(remote_id = %link.remote_id(), error = %e, "Track replacement failed");
                    false
                }
            })
            .count()
    }

    pub fn local_media(&self) -> LocalMedia {
        self.media.lock().clone()
    }

    // ==================== Teardown ====================

    /// Closes the connection to one peer. Returns false if none existed.
    pub fn close_peer(&self, remote_id: &str) -> bool {
        let Some(entry) = self.peers.write().remove(remote_id) else {
            return false;
        };
        entry.link.close();
        // Closed is reachable from every state but Closed itself.
        let _ = entry.connection.lock().transition(ConnectionState::Closed);

        info!(session_id = %self.session_id, remote_id = %remote_id, "Peer connection closed");
        self.emit(PeerEvent::Closed {
            peer_id: remote_id.to_string(),
        });
        true
    }

    /// Closes every connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self.peers.read().keys().cloned().collect();
        ids.iter().filter(|id| self.close_peer(id)).count()
    }

    /// Closes every connection, releases local tracks and rejects further
    /// negotiation.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let closed = self.close_all();
        let media = std::mem::take(&mut *self.media.lock());
        for track in [media.audio, media.camera, media.screen].into_iter().flatten() {
            self.capabilities.media.release(&track);
        }
        info!(session_id = %self.session_id, local_id = %self.local_id, closed, "Orchestrator shut down");
    }

    // ==================== Queries ====================

    pub fn connection(&self, remote_id: &str) -> Option<Connection> {
        self.peers
            .read()
            .get(remote_id)
            .map(|entry| entry.connection.lock().clone())
    }

    pub fn connections(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self
            .peers
            .read()
            .values()
            .map(|entry| entry.connection.lock().clone())
            .collect();
        all.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        all
    }

    pub fn connected_peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .peers
            .read()
            .iter()
            .filter(|(_, entry)| entry.state().is_open())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

async fn with_timeout<T, F>(limit: Duration, peer_id: &str, stage: &'static str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(PeerError::Timeout {
            peer_id: peer_id.to_string(),
            stage,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Sends one peer's queued frames in order until the peer is dropped.
async fn drain_outbound(
    entry: Weak<PeerEntry>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    context: SendContext,
) {
    while let Some(Outbound { payload, delivered }) = queue.recv().await {
        let Some(entry) = entry.upgrade() else {
            break;
        };
        let result = deliver(&entry, &payload, &context).await;
        if let Some(delivered) = delivered {
            // The caller may have stopped waiting.
            let _ = delivered.send(result);
        }
    }
}

async fn deliver(entry: &PeerEntry, payload: &str, context: &SendContext) -> Result<()> {
    let remote_id = entry.remote_id();
    let state = entry.state();
    if !state.is_open() {
        return Err(PeerError::Transport {
            peer_id: remote_id.to_string(),
            reason: format!("connection is {}", state),
        });
    }

    match with_timeout(context.send_timeout, remote_id, "send", entry.link.send(payload)).await {
        Ok(()) => {
            entry.connection.lock().touch();
            Ok(())
        }
        Err(e) => {
            entry.disconnect(&context.session_id, &e.to_string(), &context.events);
            Err(e)
        }
    }
}

/// Decodes raw frames and forwards them as events until the orchestrator
/// is dropped.
async fn decode_inbound(
    orchestrator: Weak<PeerOrchestrator>,
    mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
) {
    while let Some(raw) = inbound.recv().await {
        let Some(this) = orchestrator.upgrade() else {
            break;
        };
        match DataFrame::decode(&raw.payload) {
            Ok(frame) if frame.session_id() == this.session_id => {
                if let Ok(entry) = this.entry(&raw.from_peer_id) {
                    entry.connection.lock().touch();
                }
                this.emit(PeerEvent::FrameReceived {
                    peer_id: raw.from_peer_id,
                    frame,
                });
            }
            Ok(frame) => {
                warn!(
                    from = %raw.from_peer_id,
                    frame_session = %frame.session_id(),
                    "Dropping frame for another session"
                );
            }
            Err(e) => {
                warn!(from = %raw.from_peer_id, error = %e, "Dropping malformed frame");
            }
        }
    }
}
