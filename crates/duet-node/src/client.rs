//! In-process editor attached to a session's server peer.
//!
//! An [`EditorClient`] owns a document replica and a peer orchestrator
//! connected to [`SERVER_PEER_ID`]. Local edits are applied optimistically
//! and proposed over the data channel; committed operations relayed by the
//! server are folded back into the replica. A missed commit is recovered
//! from the session's operation log.

use duet_ot::{CommittedOperation, OtError, Replica};
use duet_peer::{DataFrame, PeerEvent, PeerOrchestrator};
use duet_session::SessionManager;
use duet_types::ChatMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::error::NodeError;
use crate::service::{DuetService, SERVER_PEER_ID};

pub struct EditorClient {
    session_id: String,
    user_id: String,
    display_name: String,
    replica: Replica,
    orchestrator: Arc<PeerOrchestrator>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    sessions: Arc<SessionManager>,
    chat: Vec<ChatMessage>,
}

impl EditorClient {
    /// Connects a participant to the session's server peer and loads the
    /// current document.
    pub async fn connect(service: &DuetService, session_id: &str, user_id: &str) -> Result<Self, NodeError> {
        let participant = service.sessions().participant(session_id, user_id)?;
        let (orchestrator, events) = PeerOrchestrator::new(
            session_id,
            user_id,
            service.config().orchestrator_config(),
            service.capabilities().peers.clone(),
        );

        let (offered, answered) = tokio::join!(
            orchestrator.connect(SERVER_PEER_ID),
            service.accept_peer(session_id, user_id)
        );
        if let Err(e) = offered {
            orchestrator.shutdown();
            return Err(e.into());
        }
        if let Err(e) = answered {
            orchestrator.shutdown();
            return Err(e);
        }

        // Commits after this snapshot arrive over the connection.
        let snapshot = service.sessions().document_snapshot(session_id)?;
        Ok(Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            display_name: participant.display_name,
            replica: Replica::new(user_id, &snapshot),
            orchestrator,
            events,
            sessions: service.sessions().clone(),
            chat: Vec::new(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn content(&self) -> &str {
        self.replica.content()
    }

    pub fn version(&self) -> u64 {
        self.replica.version()
    }

    pub fn has_pending(&self) -> bool {
        self.replica.has_pending()
    }

    pub fn chat(&self) -> &[ChatMessage] {
        &self.chat
    }

    pub fn orchestrator(&self) -> &Arc<PeerOrchestrator> {
        &self.orchestrator
    }

    /// Inserts text at a char position of the visible content.
    pub async fn insert(&mut self, position: usize, text: &str) -> Result<(), NodeError> {
        let proposal = self.replica.insert(position, text)?;
        self.propose(proposal).await
    }

    /// Deletes `length` chars at a position of the visible content.
    pub async fn delete(&mut self, position: usize, length: usize) -> Result<(), NodeError> {
        let proposal = self.replica.delete(position, length)?;
        self.propose(proposal).await
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), NodeError> {
        let message = ChatMessage::new(&self.session_id, &self.user_id, &self.display_name, text);
        self.orchestrator
            .send_to(SERVER_PEER_ID, &DataFrame::chat(message))
            .await?;
        Ok(())
    }

    async fn propose(&self, proposal: Option<duet_ot::Operation>) -> Result<(), NodeError> {
        if let Some(operation) = proposal {
            self.orchestrator
                .send_to(SERVER_PEER_ID, &DataFrame::proposal(&self.session_id, operation))
                .await?;
        }
        Ok(())
    }

    /// Handles every event already queued. Returns how many were handled.
    pub async fn pump(&mut self) -> Result<usize, NodeError> {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle(&mut self, event: PeerEvent) -> Result<(), NodeError> {
        let PeerEvent::FrameReceived { frame, .. } = event else {
            return Ok(());
        };
        if let Some(committed) = frame.as_committed() {
            return self.apply(&committed).await;
        }
        if let DataFrame::Chat(message) = frame {
            self.chat.push(message);
        }
        Ok(())
    }

    async fn apply(&mut self, committed: &CommittedOperation) -> Result<(), NodeError> {
        match self.replica.receive(committed) {
            Ok(next) => self.propose(next).await,
            Err(OtError::VersionGap { expected, received }) => {
                debug!(
                    user_id = %self.user_id,
                    expected,
                    received,
                    "Catching up on missed commits"
                );
                self.catch_up().await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies every commit after the replica's version from the log.
    pub async fn catch_up(&mut self) -> Result<(), NodeError> {
        let missed = self
            .sessions
            .operations_since(&self.session_id, self.replica.version())?;
        for committed in missed {
            let next = self.replica.receive(&committed)?;
            self.propose(next).await?;
        }
        Ok(())
    }

    /// Waits until every local edit is committed and the replica has seen
    /// `version`.
    pub async fn settle(&mut self, version: u64, timeout: Duration) -> Result<(), NodeError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump().await?;
            if !self.replica.has_pending() && self.replica.version() >= version {
                return Ok(());
            }
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => self.handle(event).await?,
                Ok(None) | Err(_) => {
                    return Err(NodeError::Timeout {
                        what: format!(
                            "{} to reach version {} (at {}, pending {})",
                            self.user_id,
                            version,
                            self.replica.version(),
                            self.replica.pending_count()
                        ),
                    })
                }
            }
        }
    }

    /// Waits until every local edit is committed.
    pub async fn flush(&mut self, timeout: Duration) -> Result<(), NodeError> {
        let version = self.replica.version();
        self.settle(version, timeout).await
    }

    /// Waits for the next relayed chat message.
    pub async fn next_chat(&mut self, timeout: Duration) -> Result<ChatMessage, NodeError> {
        let seen = self.chat.len();
        let deadline = Instant::now() + timeout;
        while self.chat.len() == seen {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => self.handle(event).await?,
                Ok(None) | Err(_) => {
                    return Err(NodeError::Timeout {
                        what: format!("chat for {}", self.user_id),
                    })
                }
            }
        }
        Ok(self.chat[seen].clone())
    }

    /// Drops pending edits and closes the connection.
    pub fn close(mut self) {
        self.replica.discard_pending();
        self.orchestrator.shutdown();
    }
}
