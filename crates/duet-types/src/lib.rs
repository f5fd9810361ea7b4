//! Common types used throughout `duet`.
//!
//! This crate holds the small vocabulary every other crate shares: user
//! identities handed to the core by the external identity provider, chat
//! messages carried over data channels, and millisecond timestamps.

mod chat;
mod identity;
mod time;

pub use chat::ChatMessage;
pub use identity::{UserIdentity, UserRole};
pub use time::{now_millis, Timestamp};

/// Identifier of a collaboration session.
pub type SessionId = String;

/// Identifier of a user, as issued by the identity provider.
pub type UserId = String;

/// Generates a new random identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
