//! Error types for session operations.

use duet_ot::OtError;
use thiserror::Error;

use crate::permission::PermissionLevel;

/// Errors that can occur during session operations.
///
/// Every variant carries the session or entity id and, where one exists,
/// the acting user. No state is mutated when an error is returned.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session does not exist.
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Session has ended or been archived.
    #[error("session has ended: {session_id}")]
    SessionEnded { session_id: String },

    /// Participant cap reached.
    #[error("session {session_id} is full ({max} participants)")]
    SessionFull { session_id: String, max: usize },

    /// Supplied invite code does not match a private session.
    #[error("invalid invite code for session {session_id}")]
    InvalidInviteCode { session_id: String },

    /// Session requires approval and the user has none.
    #[error("user {user_id} needs approval to join session {session_id}")]
    ApprovalRequired { session_id: String, user_id: String },

    /// User is already a participant.
    #[error("user {user_id} already joined session {session_id}")]
    AlreadyJoined { session_id: String, user_id: String },

    /// User is not a participant.
    #[error("user {user_id} is not a participant of session {session_id}")]
    NotAParticipant { session_id: String, user_id: String },

    /// Only the owner may perform the action.
    #[error("user {user_id} is not the owner of session {session_id}")]
    NotOwner { session_id: String, user_id: String },

    /// Actor's permission is below what the action needs.
    #[error("user {user_id} needs {required} permission in session {session_id}")]
    InsufficientPermission {
        session_id: String,
        user_id: String,
        required: PermissionLevel,
    },

    /// Operation author is not a current participant.
    #[error("operation by {user_id} rejected: not a participant of session {session_id}")]
    UnauthorizedOperation { session_id: String, user_id: String },

    /// Lifecycle transition outside the allowed order.
    #[error("invalid state in session {session_id}: cannot {action} when status is {current}")]
    InvalidState {
        session_id: String,
        action: String,
        current: String,
    },

    /// Chat is disabled in the session settings.
    #[error("chat is disabled in session {session_id}")]
    ChatDisabled { session_id: String },

    /// Invitation does not exist.
    #[error("invitation not found: {invitation_id}")]
    InvitationNotFound { invitation_id: String },

    /// Invitation was accepted after its expiry.
    #[error("invitation expired: {invitation_id}")]
    InvitationExpired { invitation_id: String },

    /// Invitation was already accepted or declined.
    #[error("invitation {invitation_id} already {status}")]
    InvitationAlreadyResolved {
        invitation_id: String,
        status: String,
    },

    /// Invitation was addressed to someone else.
    #[error("invitation {invitation_id} is not addressed to {user_id}")]
    InvitationMismatch {
        invitation_id: String,
        user_id: String,
    },

    /// Template does not exist.
    #[error("template not found: {template_id}")]
    TemplateNotFound { template_id: String },

    /// Invalid input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Rejected by the sequencing authority.
    #[error(transparent)]
    Document(#[from] OtError),
}

/// Broad classes of session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller may not enter the session.
    Admission,
    /// The caller may not perform the action.
    Authorization,
    /// The action is out of order for the current state.
    State,
    /// Malformed input or unknown entity.
    Validation,
    /// The document engine rejected an operation.
    Document,
}

impl SessionError {
    /// Stable snake_case tag for the error.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::SessionNotFound { .. } => "session_not_found",
            SessionError::SessionEnded { .. } => "session_ended",
            SessionError::SessionFull { .. } => "session_full",
            SessionError::InvalidInviteCode { .. } => "invalid_invite_code",
            SessionError::ApprovalRequired { .. } => "approval_required",
            SessionError::AlreadyJoined { .. } => "already_joined",
            SessionError::NotAParticipant { .. } => "not_a_participant",
            SessionError::NotOwner { .. } => "not_owner",
            SessionError::InsufficientPermission { .. } => "insufficient_permission",
            SessionError::UnauthorizedOperation { .. } => "unauthorized_operation",
            SessionError::InvalidState { .. } => "invalid_state",
            SessionError::ChatDisabled { .. } => "chat_disabled",
            SessionError::InvitationNotFound { .. } => "invitation_not_found",
            SessionError::InvitationExpired { .. } => "invitation_expired",
            SessionError::InvitationAlreadyResolved { .. } => "invitation_already_resolved",
            SessionError::InvitationMismatch { .. } => "invitation_mismatch",
            SessionError::TemplateNotFound { .. } => "template_not_found",
            SessionError::Validation(_) => "validation",
            SessionError::Document(e) => e.kind(),
        }
    }

    /// Category of the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::SessionNotFound { .. }
            | SessionError::SessionEnded { .. }
            | SessionError::SessionFull { .. }
            | SessionError::InvalidInviteCode { .. }
            | SessionError::ApprovalRequired { .. }
            | SessionError::AlreadyJoined { .. }
            | SessionError::InvitationExpired { .. } => ErrorCategory::Admission,

            SessionError::NotAParticipant { .. }
            | SessionError::NotOwner { .. }
            | SessionError::InsufficientPermission { .. }
            | SessionError::UnauthorizedOperation { .. }
            | SessionError::InvitationMismatch { .. } => ErrorCategory::Authorization,

            SessionError::InvalidState { .. }
            | SessionError::ChatDisabled { .. }
            | SessionError::InvitationAlreadyResolved { .. } => ErrorCategory::State,

            SessionError::InvitationNotFound { .. }
            | SessionError::TemplateNotFound { .. }
            | SessionError::Validation(_) => ErrorCategory::Validation,

            SessionError::Document(OtError::UnauthorizedOperation { .. }) => {
                ErrorCategory::Authorization
            }
            SessionError::Document(_) => ErrorCategory::Document,
        }
    }
}
