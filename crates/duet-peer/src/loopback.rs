//! In-process transport adapter.
//!
//! Every orchestrator attached to the same [`LoopbackNetwork`] can reach the
//! others. Pairs can be severed and their statistics degraded to exercise
//! reconnection and quality monitoring.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::PeerError;
use crate::link::{FrameSink, InboundFrame, PeerLink, PeerLinkFactory};
use crate::media::{LocalMedia, MediaKind, MediaSource, MediaTrack};
use crate::quality::ConnectionStats;
use crate::signaling::{SignalKind, SignalingChannel, SignalingMessage};
use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug)]
struct Endpoint {
    inbound: FrameSink,
    negotiated: bool,
    has_remote_candidate: bool,
    video_track: Option<String>,
}

#[derive(Debug, Default)]
struct NetworkState {
    /// Keyed by (local, remote).
    endpoints: HashMap<(String, String), Endpoint>,
    severed: HashSet<(String, String)>,
    stats: HashMap<(String, String), ConnectionStats>,
    latency: HashMap<(String, String), Duration>,
    mailboxes: HashMap<String, VecDeque<SignalingMessage>>,
}

/// Shared in-process network.
#[derive(Debug, Default)]
pub struct LoopbackNetwork {
    state: Mutex<NetworkState>,
    signals: Notify,
    sent_frames: AtomicU64,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn link_factory(self: &Arc<Self>) -> Arc<LoopbackLinkFactory> {
        Arc::new(LoopbackLinkFactory {
            network: self.clone(),
        })
    }

    pub fn signaling(self: &Arc<Self>) -> Arc<LoopbackSignaling> {
        Arc::new(LoopbackSignaling {
            network: self.clone(),
        })
    }

    /// Cuts the pair: sends fail and restarts fail until restored.
    pub fn sever(&self, a: &str, b: &str) {
        self.state.lock().severed.insert(pair(a, b));
    }

    pub fn restore(&self, a: &str, b: &str) {
        self.state.lock().severed.remove(&pair(a, b));
    }

    pub fn is_severed(&self, a: &str, b: &str) -> bool {
        self.state.lock().severed.contains(&pair(a, b))
    }

    /// Sets the statistics both ends of a pair report.
    pub fn set_stats(&self, a: &str, b: &str, stats: ConnectionStats) {
        self.state.lock().stats.insert(pair(a, b), stats);
    }

    /// Delays every frame sent between the pair.
    pub fn set_latency(&self, a: &str, b: &str, latency: Duration) {
        self.state.lock().latency.insert(pair(a, b), latency);
    }

    fn latency(&self, a: &str, b: &str) -> Option<Duration> {
        self.state.lock().latency.get(&pair(a, b)).copied()
    }

    /// Id of the video track `local` currently sends to `remote`.
    pub fn video_track(&self, local: &str, remote: &str) -> Option<String> {
        self.state
            .lock()
            .endpoints
            .get(&(local.to_string(), remote.to_string()))
            .and_then(|e| e.video_track.clone())
    }

    /// Frames delivered since creation.
    pub fn sent_frames(&self) -> u64 {
        self.sent_frames.load(Ordering::Relaxed)
    }

    fn with_endpoint<T>(
        &self,
        local: &str,
        remote: &str,
        f: impl FnOnce(&mut Endpoint) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock();
        state
            .endpoints
            .get_mut(&(local.to_string(), remote.to_string()))
            .map(f)
            .ok_or_else(|| PeerError::Transport {
                peer_id: remote.to_string(),
                reason: "link closed".to_string(),
            })
    }

    fn is_connected(&self, local: &str, remote: &str) -> bool {
        let state = self.state.lock();
        if state.severed.contains(&pair(local, remote)) {
            return false;
        }
        let ready = |from: &str, to: &str| {
            state
                .endpoints
                .get(&(from.to_string(), to.to_string()))
                .map_or(false, |e| e.negotiated && e.has_remote_candidate)
        };
        ready(local, remote) && ready(remote, local)
    }

    fn deliver(&self, from: &str, to: &str, payload: &str) -> Result<()> {
        let state = self.state.lock();
        let fail = |reason: &str| PeerError::Transport {
            peer_id: to.to_string(),
            reason: reason.to_string(),
        };
        if state.severed.contains(&pair(from, to)) {
            return Err(fail("link severed"));
        }
        let endpoint = state
            .endpoints
            .get(&(to.to_string(), from.to_string()))
            .ok_or_else(|| fail("peer not reachable"))?;
        endpoint
            .inbound
            .send(InboundFrame {
                from_peer_id: from.to_string(),
                payload: payload.to_string(),
            })
            .map_err(|_| fail("peer stopped receiving"))?;
        self.sent_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Creates [`LoopbackLink`]s on a network.
#[derive(Debug)]
pub struct LoopbackLinkFactory {
    network: Arc<LoopbackNetwork>,
}

#[async_trait]
impl PeerLinkFactory for LoopbackLinkFactory {
    async fn create(
        &self,
        local_id: &str,
        remote_id: &str,
        media: &LocalMedia,
        inbound: FrameSink,
    ) -> Result<Arc<dyn PeerLink>> {
        let endpoint = Endpoint {
            inbound,
            negotiated: false,
            has_remote_candidate: false,
            video_track: media.outgoing_video().map(|t| t.id.clone()),
        };
        self.network
            .state
            .lock()
            .endpoints
            .insert((local_id.to_string(), remote_id.to_string()), endpoint);

        Ok(Arc::new(LoopbackLink {
            local: local_id.to_string(),
            remote: remote_id.to_string(),
            network: self.network.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One end of an in-process connection.
#[derive(Debug)]
pub struct LoopbackLink {
    local: String,
    remote: String,
    network: Arc<LoopbackNetwork>,
    closed: AtomicBool,
}

impl LoopbackLink {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Transport {
                peer_id: self.remote.clone(),
                reason: "link closed".to_string(),
            });
        }
        Ok(())
    }

    fn expect_description(&self, description: &str, prefix: &str) -> Result<()> {
        let expected = format!("{}:{}->{}", prefix, self.remote, self.local);
        if description != expected {
            return Err(PeerError::Transport {
                peer_id: self.remote.clone(),
                reason: format!("unexpected description {:?}", description),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for LoopbackLink {
    fn remote_id(&self) -> &str {
        &self.remote
    }

    async fn create_offer(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(format!("offer:{}->{}", self.local, self.remote))
    }

    async fn accept_offer(&self, offer: &str) -> Result<String> {
        self.ensure_open()?;
        self.expect_description(offer, "offer")?;
        self.network
            .with_endpoint(&self.local, &self.remote, |e| e.negotiated = true)?;
        Ok(format!("answer:{}->{}", self.local, self.remote))
    }

    async fn apply_answer(&self, answer: &str) -> Result<()> {
        self.ensure_open()?;
        self.expect_description(answer, "answer")?;
        self.network
            .with_endpoint(&self.local, &self.remote, |e| e.negotiated = true)
    }

    async fn local_candidates(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(vec![format!("candidate:{}:loopback", self.local)])
    }

    async fn add_candidate(&self, candidate: &str) -> Result<()> {
        self.ensure_open()?;
        if !candidate.starts_with("candidate:") {
            return Err(PeerError::Transport {
                peer_id: self.remote.clone(),
                reason: format!("malformed candidate {:?}", candidate),
            });
        }
        self.network
            .with_endpoint(&self.local, &self.remote, |e| e.has_remote_candidate = true)
    }

    async fn wait_connected(&self) -> Result<()> {
        loop {
            self.ensure_open()?;
            if self.network.is_connected(&self.local, &self.remote) {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn send(&self, frame: &str) -> Result<()> {
        self.ensure_open()?;
        if let Some(latency) = self.network.latency(&self.local, &self.remote) {
            tokio::time::sleep(latency).await;
        }
        trace!(from = %self.local, to = %self.remote, bytes = frame.len(), "Loopback frame");
        self.network.deliver(&self.local, &self.remote, frame)
    }

    async fn stats(&self) -> Result<ConnectionStats> {
        self.ensure_open()?;
        let state = self.network.state.lock();
        Ok(state
            .stats
            .get(&pair(&self.local, &self.remote))
            .copied()
            .unwrap_or_default())
    }

    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<()> {
        self.ensure_open()?;
        let id = track.map(|t| t.id.clone());
        self.network
            .with_endpoint(&self.local, &self.remote, |e| e.video_track = id)
    }

    async fn restart(&self) -> Result<()> {
        self.ensure_open()?;
        if self.network.is_severed(&self.local, &self.remote) {
            return Err(PeerError::Transport {
                peer_id: self.remote.clone(),
                reason: "link severed".to_string(),
            });
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.network
            .state
            .lock()
            .endpoints
            .remove(&(self.local.clone(), self.remote.clone()));
    }
}

/// Mailbox relay on a loopback network.
#[derive(Debug)]
pub struct LoopbackSignaling {
    network: Arc<LoopbackNetwork>,
}

#[async_trait]
impl SignalingChannel for LoopbackSignaling {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        trace!(
            from = %message.from_peer_id,
            to = %message.to_peer_id,
            kind = %message.kind,
            "Loopback signal"
        );
        self.network
            .state
            .lock()
            .mailboxes
            .entry(message.to_peer_id.clone())
            .or_default()
            .push_back(message);
        self.network.signals.notify_waiters();
        Ok(())
    }

    async fn recv(
        &self,
        local_peer_id: &str,
        from_peer_id: &str,
        kind: SignalKind,
    ) -> Result<SignalingMessage> {
        loop {
            let notified = self.network.signals.notified();
            {
                let mut state = self.network.state.lock();
                if let Some(mailbox) = state.mailboxes.get_mut(local_peer_id) {
                    let found = mailbox
                        .iter()
                        .position(|m| m.from_peer_id == from_peer_id && m.kind == kind);
                    if let Some(message) = found.and_then(|index| mailbox.remove(index)) {
                        return Ok(message);
                    }
                }
            }
            notified.await;
        }
    }
}

/// Capture source producing synthetic tracks.
#[derive(Debug, Default)]
pub struct LoopbackMedia {
    unavailable: Mutex<HashSet<MediaKind>>,
    next_id: AtomicU64,
    released: Mutex<Vec<String>>,
}

impl LoopbackMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes acquiring `kind` fail, as if the device were missing.
    pub fn set_unavailable(&self, kind: MediaKind) {
        self.unavailable.lock().insert(kind);
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl MediaSource for LoopbackMedia {
    async fn acquire(&self, kind: MediaKind) -> Result<MediaTrack> {
        if self.unavailable.lock().contains(&kind) {
            return Err(PeerError::MediaUnavailable(kind.to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(MediaTrack::new(format!("{}-{}", kind, n), kind))
    }

    fn release(&self, track: &MediaTrack) {
        self.released.lock().push(track.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_signaling_mailbox_matches_sender_and_kind() {
        let network = LoopbackNetwork::new();
        let signaling = network.signaling();

        signaling
            .send(SignalingMessage::new("s", "a", "b", SignalKind::IceCandidate, "c"))
            .await
            .unwrap();
        signaling
            .send(SignalingMessage::new("s", "a", "b", SignalKind::Offer, "o"))
            .await
            .unwrap();

        let offer = signaling.recv("b", "a", SignalKind::Offer).await.unwrap();
        assert_eq!(offer.payload, "o");
        let candidate = signaling
            .recv("b", "a", SignalKind::IceCandidate)
            .await
            .unwrap();
        assert_eq!(candidate.payload, "c");
    }

    #[tokio::test]
    async fn test_send_requires_remote_endpoint() {
        let network = LoopbackNetwork::new();
        let factory = network.link_factory();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = factory
            .create("a", "b", &LocalMedia::default(), tx_a)
            .await
            .unwrap();
        assert!(a.send("early").await.is_err());

        let _b = factory
            .create("b", "a", &LocalMedia::default(), tx_b)
            .await
            .unwrap();
        a.send("hello").await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap().payload, "hello");

        network.sever("b", "a");
        assert!(a.send("lost").await.is_err());
        assert!(a.restart().await.is_err());
        network.restore("a", "b");
        assert!(a.restart().await.is_ok());
        assert_eq!(network.sent_frames(), 1);
    }

    #[tokio::test]
    async fn test_media_unavailable() {
        let media = LoopbackMedia::new();
        media.set_unavailable(MediaKind::Video);
        assert!(media.acquire(MediaKind::Audio).await.is_ok());
        let err = media.acquire(MediaKind::Video).await.unwrap_err();
        assert_eq!(err.kind(), "media_unavailable");
    }
}
