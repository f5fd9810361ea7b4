//! Chat messages exchanged inside a session.

use serde::{Deserialize, Serialize};

use crate::now_millis;

/// A chat message sent by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique message id.
    pub id: String,
    /// Session the message belongs to.
    pub session_id: String,
    /// Author of the message.
    pub user_id: String,
    /// Display name of the author at send time.
    pub display_name: String,
    /// Message body.
    pub text: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl ChatMessage {
    /// Creates a new chat message stamped with the current time.
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            text: text.into(),
            timestamp: now_millis(),
        }
    }
}
