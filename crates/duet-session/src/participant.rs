//! Participants and their ephemeral editor state.

use duet_types::{SessionId, UserId, UserIdentity, UserRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::permission::PermissionLevel;

/// Transport status of a participant, as reported by the peer layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "CONNECTED"),
            ConnectionStatus::Reconnecting => write!(f, "RECONNECTING"),
            ConnectionStatus::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

/// Caret position in the shared document, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

/// Selected range in the shared document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: CursorPosition,
    pub end: CursorPosition,
}

/// A user inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Identity classification, independent of permission.
    pub role: UserRole,
    pub permission: PermissionLevel,
    pub connection_status: ConnectionStatus,
    pub joined_at: u64,
    pub last_activity: u64,
    pub cursor: Option<CursorPosition>,
    pub selection: Option<SelectionRange>,
    /// Explicit answer to the recording consent prompt.
    pub recording_consent: bool,
}

impl Participant {
    pub fn new(identity: &UserIdentity, permission: PermissionLevel, now: u64) -> Self {
        Self {
            user_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            role: identity.role,
            permission,
            connection_status: ConnectionStatus::Connected,
            joined_at: now,
            last_activity: now,
            cursor: None,
            selection: None,
            recording_consent: false,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.permission == PermissionLevel::Owner
    }

    pub fn touch(&mut self, now: u64) {
        self.last_activity = self.last_activity.max(now);
    }

    /// Whether this participant counts as consenting to recording.
    ///
    /// Admins and the owner consent implicitly.
    pub fn consents_to_recording(&self) -> bool {
        self.recording_consent || self.permission.is_admin()
    }
}

/// Recording consent of every current participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentSnapshot {
    pub session_id: SessionId,
    pub recording_enabled: bool,
    /// Whether consent gates recording in this session.
    pub consent_required: bool,
    /// Effective consent per participant, admins and owner included as true.
    pub participants: BTreeMap<UserId, bool>,
}

impl ConsentSnapshot {
    /// Participants whose consent is missing.
    pub fn missing(&self) -> Vec<&str> {
        self.participants
            .iter()
            .filter(|(_, consent)| !**consent)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
