//! Data-channel frames carrying operations and chat.

use duet_ot::{CommittedOperation, Operation};
use duet_types::ChatMessage;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A JSON frame sent over a peer data channel.
///
/// An `OPERATION` frame without `version` is a proposal for the sequencing
/// authority; with `version` it is a committed operation to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFrame {
    #[serde(rename_all = "camelCase")]
    Operation {
        session_id: String,
        operation: Operation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        committed_at: Option<u64>,
    },
    Chat(ChatMessage),
}

impl DataFrame {
    /// Frame proposing a locally authored operation.
    pub fn proposal(session_id: impl Into<String>, operation: Operation) -> Self {
        DataFrame::Operation {
            session_id: session_id.into(),
            operation,
            version: None,
            committed_at: None,
        }
    }

    /// Frame relaying a committed operation.
    pub fn committed(session_id: impl Into<String>, committed: &CommittedOperation) -> Self {
        DataFrame::Operation {
            session_id: session_id.into(),
            operation: committed.operation.clone(),
            version: Some(committed.version),
            committed_at: Some(committed.committed_at),
        }
    }

    pub fn chat(message: ChatMessage) -> Self {
        DataFrame::Chat(message)
    }

    pub fn session_id(&self) -> &str {
        match self {
            DataFrame::Operation { session_id, .. } => session_id,
            DataFrame::Chat(message) => &message.session_id,
        }
    }

    /// The committed operation this frame carries, if any.
    pub fn as_committed(&self) -> Option<CommittedOperation> {
        match self {
            DataFrame::Operation {
                operation,
                version: Some(version),
                committed_at,
                ..
            } => Some(CommittedOperation {
                version: *version,
                operation: operation.clone(),
                committed_at: committed_at.unwrap_or(operation.timestamp),
            }),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
