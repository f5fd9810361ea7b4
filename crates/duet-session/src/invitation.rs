//! Invitations to join a session with a given permission.

use duet_types::{SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::permission::PermissionLevel;
use crate::{Result, SessionError};

/// Resolution state of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "pending"),
            InvitationStatus::Accepted => write!(f, "accepted"),
            InvitationStatus::Declined => write!(f, "declined"),
        }
    }
}

/// An invitation for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub session_id: SessionId,
    pub inviter_id: UserId,
    pub invitee_id: UserId,
    /// Permission granted on acceptance. Never OWNER.
    pub permission: PermissionLevel,
    pub status: InvitationStatus,
    pub created_at: u64,
    pub expires_at: u64,
    /// When it was accepted or declined.
    pub resolved_at: Option<u64>,
}

impl Invitation {
    pub fn new(
        session_id: impl Into<SessionId>,
        inviter_id: impl Into<UserId>,
        invitee_id: impl Into<UserId>,
        permission: PermissionLevel,
        created_at: u64,
        ttl_ms: u64,
    ) -> Self {
        Self {
            id: duet_types::new_id(),
            session_id: session_id.into(),
            inviter_id: inviter_id.into(),
            invitee_id: invitee_id.into(),
            permission,
            status: InvitationStatus::Pending,
            created_at,
            expires_at: created_at.saturating_add(ttl_ms),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Checks that `user_id` may resolve this invitation at `now`.
    pub fn check_resolvable(&self, user_id: &str, now: u64) -> Result<()> {
        if !self.is_pending() {
            return Err(SessionError::InvitationAlreadyResolved {
                invitation_id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        if self.invitee_id != user_id {
            return Err(SessionError::InvitationMismatch {
                invitation_id: self.id.clone(),
                user_id: user_id.to_string(),
            });
        }
        if self.is_expired(now) {
            return Err(SessionError::InvitationExpired {
                invitation_id: self.id.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn resolve(&mut self, status: InvitationStatus, now: u64) {
        self.status = status;
        self.resolved_at = Some(now);
    }
}
