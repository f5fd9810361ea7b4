//! Permission levels inside a session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a participant may do in a session.
///
/// Levels are ordered: ViewOnly < Edit < Admin < Owner. Exactly one
/// participant holds Owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    /// Can follow the document and chat.
    ViewOnly,
    /// Can edit the document.
    Edit,
    /// Can manage settings, permissions and invitations.
    Admin,
    /// Created the session or received ownership.
    Owner,
}

impl PermissionLevel {
    /// Check if this level grants at least the required level.
    pub fn has(&self, required: PermissionLevel) -> bool {
        *self >= required
    }

    /// Whether this level may manage the session.
    pub fn is_admin(&self) -> bool {
        self.has(PermissionLevel::Admin)
    }

    /// The next level up. Owner is the top.
    pub fn above(&self) -> PermissionLevel {
        match self {
            PermissionLevel::ViewOnly => PermissionLevel::Edit,
            PermissionLevel::Edit => PermissionLevel::Admin,
            PermissionLevel::Admin | PermissionLevel::Owner => PermissionLevel::Owner,
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "view_only" | "view" | "read" => Some(PermissionLevel::ViewOnly),
            "edit" | "write" => Some(PermissionLevel::Edit),
            "admin" => Some(PermissionLevel::Admin),
            "owner" => Some(PermissionLevel::Owner),
            _ => None,
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::ViewOnly => write!(f, "VIEW_ONLY"),
            PermissionLevel::Edit => write!(f, "EDIT"),
            PermissionLevel::Admin => write!(f, "ADMIN"),
            PermissionLevel::Owner => write!(f, "OWNER"),
        }
    }
}

impl Default for PermissionLevel {
    fn default() -> Self {
        PermissionLevel::Edit
    }
}
