//! Error types for the event log and hub.

use thiserror::Error;

/// Errors that can occur in event log and hub operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Invalid channel format.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// Subscription limit exceeded.
    #[error("subscription limit exceeded: max {0} subscriptions")]
    SubscriptionLimit(usize),

    /// Subscriber not found.
    #[error("subscriber not found: {0}")]
    SubscriberNotFound(String),

    /// Too many registered subscribers.
    #[error("subscriber limit reached: max {0} subscribers")]
    SubscriberLimit(usize),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}
