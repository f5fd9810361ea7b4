//! Session event records.

use duet_types::SessionId;
use serde::{Deserialize, Serialize};

/// One entry in a session's event log.
///
/// Serializes as `{ id, sessionId, type, userId, timestamp, data }`. The log
/// stores `data` opaquely; only the `type` tag is interpreted, for routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// Sequential id assigned by the log.
    pub id: u64,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Actor, if the event was caused by a user.
    pub user_id: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Structured payload.
    pub data: serde_json::Value,
}

impl SessionEvent {
    /// Channel filter this event is published under.
    pub fn category(&self) -> EventCategory {
        self.kind.category()
    }
}

/// Event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // Lifecycle
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.started")]
    SessionStarted,
    #[serde(rename = "session.paused")]
    SessionPaused,
    #[serde(rename = "session.resumed")]
    SessionResumed,
    #[serde(rename = "session.ended")]
    SessionEnded,
    #[serde(rename = "session.archived")]
    SessionArchived,
    #[serde(rename = "settings.updated")]
    SettingsUpdated,

    // Participants
    #[serde(rename = "participant.joined")]
    ParticipantJoined,
    #[serde(rename = "participant.left")]
    ParticipantLeft,
    #[serde(rename = "participant.approved")]
    ParticipantApproved,
    #[serde(rename = "permission.changed")]
    PermissionChanged,
    #[serde(rename = "ownership.transferred")]
    OwnershipTransferred,
    #[serde(rename = "invitation.created")]
    InvitationCreated,
    #[serde(rename = "invitation.accepted")]
    InvitationAccepted,
    #[serde(rename = "invitation.declined")]
    InvitationDeclined,
    #[serde(rename = "consent.changed")]
    ConsentChanged,

    // Document
    #[serde(rename = "operation.committed")]
    OperationCommitted,

    // Connection
    #[serde(rename = "connection.lost")]
    ConnectionLost,
    #[serde(rename = "connection.restored")]
    ConnectionRestored,

    // Recording
    #[serde(rename = "recording.started")]
    RecordingStarted,
    #[serde(rename = "recording.paused")]
    RecordingPaused,
    #[serde(rename = "recording.resumed")]
    RecordingResumed,
    #[serde(rename = "recording.stopped")]
    RecordingStopped,
    #[serde(rename = "recording.ready")]
    RecordingReady,
    #[serde(rename = "recording.aborted")]
    RecordingAborted,

    // Chat
    #[serde(rename = "chat.message")]
    ChatMessage,
}

impl EventKind {
    /// Wire tag of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionCreated => "session.created",
            EventKind::SessionStarted => "session.started",
            EventKind::SessionPaused => "session.paused",
            EventKind::SessionResumed => "session.resumed",
            EventKind::SessionEnded => "session.ended",
            EventKind::SessionArchived => "session.archived",
            EventKind::SettingsUpdated => "settings.updated",
            EventKind::ParticipantJoined => "participant.joined",
            EventKind::ParticipantLeft => "participant.left",
            EventKind::ParticipantApproved => "participant.approved",
            EventKind::PermissionChanged => "permission.changed",
            EventKind::OwnershipTransferred => "ownership.transferred",
            EventKind::InvitationCreated => "invitation.created",
            EventKind::InvitationAccepted => "invitation.accepted",
            EventKind::InvitationDeclined => "invitation.declined",
            EventKind::ConsentChanged => "consent.changed",
            EventKind::OperationCommitted => "operation.committed",
            EventKind::ConnectionLost => "connection.lost",
            EventKind::ConnectionRestored => "connection.restored",
            EventKind::RecordingStarted => "recording.started",
            EventKind::RecordingPaused => "recording.paused",
            EventKind::RecordingResumed => "recording.resumed",
            EventKind::RecordingStopped => "recording.stopped",
            EventKind::RecordingReady => "recording.ready",
            EventKind::RecordingAborted => "recording.aborted",
            EventKind::ChatMessage => "chat.message",
        }
    }

    /// Category used for channel filtering.
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::SessionCreated
            | EventKind::SessionStarted
            | EventKind::SessionPaused
            | EventKind::SessionResumed
            | EventKind::SessionEnded
            | EventKind::SessionArchived
            | EventKind::SettingsUpdated => EventCategory::Lifecycle,

            EventKind::ParticipantJoined
            | EventKind::ParticipantLeft
            | EventKind::ParticipantApproved
            | EventKind::PermissionChanged
            | EventKind::OwnershipTransferred
            | EventKind::InvitationCreated
            | EventKind::InvitationAccepted
            | EventKind::InvitationDeclined
            | EventKind::ConsentChanged => EventCategory::Participants,

            EventKind::OperationCommitted => EventCategory::Document,

            EventKind::ConnectionLost | EventKind::ConnectionRestored => {
                EventCategory::Connection
            }

            EventKind::RecordingStarted
            | EventKind::RecordingPaused
            | EventKind::RecordingResumed
            | EventKind::RecordingStopped
            | EventKind::RecordingReady
            | EventKind::RecordingAborted => EventCategory::Recording,

            EventKind::ChatMessage => EventCategory::Chat,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping of event kinds, addressable as a channel filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Lifecycle,
    Participants,
    Document,
    Connection,
    Recording,
    Chat,
}

impl EventCategory {
    /// Filter segment used in channel names.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Lifecycle => "lifecycle",
            EventCategory::Participants => "participants",
            EventCategory::Document => "document",
            EventCategory::Connection => "connection",
            EventCategory::Recording => "recording",
            EventCategory::Chat => "chat",
        }
    }

    /// Parses a filter segment.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lifecycle" => Some(EventCategory::Lifecycle),
            "participants" => Some(EventCategory::Participants),
            "document" => Some(EventCategory::Document),
            "connection" => Some(EventCategory::Connection),
            "recording" => Some(EventCategory::Recording),
            "chat" => Some(EventCategory::Chat),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
