//! Identity types supplied by the external identity provider.

use serde::{Deserialize, Serialize};
use std::fmt;

/// External identity classification of a user.
///
/// This is not a permission: what a user may do inside a session is decided
/// by the session's permission level, not by this role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// A learner.
    #[default]
    Student,
    /// An instructor.
    Teacher,
    /// A platform administrator.
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Student => write!(f, "student"),
            UserRole::Teacher => write!(f, "teacher"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

/// An authenticated user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user identifier.
    pub id: String,
    /// Name shown to other participants.
    pub display_name: String,
    /// Optional avatar URL.
    pub avatar_url: Option<String>,
    /// Identity classification.
    pub role: UserRole,
}

impl UserIdentity {
    /// Creates a new identity with the default role.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            role: UserRole::default(),
        }
    }

    /// Sets the role.
    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    /// Sets the avatar URL.
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    /// Returns true if the identity carries a usable id.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }
}
