//! # Duet Realtime
//!
//! Append-only event journal for collaboration sessions, and the typed hub
//! that fans each appended event out to registered handlers.
//!
//! ## Channels
//!
//! - `session:<id>` - every event of a session
//! - `session:<id>/<category>` - `participants`, `document`, `recording`,
//!   `connection`, `chat` or `lifecycle` events only
//! - `user:<id>` - events caused by a user
//!
//! ## Example
//!
//! ```rust
//! use duet_realtime::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! let (_handler, mut rx) = log.hub().subscribe("analytics", "session:s1").unwrap();
//!
//! log.append("s1", EventKind::ParticipantJoined, Some("bob"), serde_json::json!({}));
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.kind, EventKind::ParticipantJoined);
//! assert_eq!(log.events("s1").len(), 1);
//! ```

pub mod error;
pub mod event;
pub mod hub;
pub mod log;
pub mod subscriber;
pub mod subscription;

pub use error::RealtimeError;
pub use event::{EventCategory, EventKind, SessionEvent};
pub use hub::{EventHub, HubStats};
pub use log::EventLog;
pub use subscriber::{Subscriber, SubscriberId, SubscriberReceiver};
pub use subscription::{Channel, ChannelType, Subscriptions, MAX_SUBSCRIPTIONS_PER_SUBSCRIBER};

/// Result type for event log and hub operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_shared_hub() {
        let hub = Arc::new(EventHub::new());
        let log = EventLog::with_hub(hub.clone());
        let (_sub, mut rx) = hub.subscribe("user-feed", "user:alice").unwrap();

        log.append("s1", EventKind::SessionCreated, Some("alice"), serde_json::json!({}));
        log.append("s2", EventKind::ChatMessage, Some("alice"), serde_json::json!({}));
        log.append("s2", EventKind::ChatMessage, Some("bob"), serde_json::json!({}));

        assert_eq!(rx.try_recv().unwrap().session_id, "s1");
        assert_eq!(rx.try_recv().unwrap().session_id, "s2");
        assert!(rx.try_recv().is_err());
    }
}
