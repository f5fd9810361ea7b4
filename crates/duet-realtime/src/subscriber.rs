//! Registered event handlers.

use crate::error::RealtimeError;
use crate::event::SessionEvent;
use crate::subscription::{Channel, Subscriptions};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unique identifier for a registered subscriber.
pub type SubscriberId = String;

/// Queue a subscriber drains its events from.
pub type SubscriberReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// A handler registered with the hub.
///
/// Each subscriber owns its queue, so a slow consumer only delays itself.
#[derive(Debug)]
pub struct Subscriber {
    /// Unique subscriber identifier.
    pub id: SubscriberId,
    /// Free-form label for logs.
    pub label: String,
    sender: mpsc::UnboundedSender<SessionEvent>,
    subscriptions: RwLock<Subscriptions>,
}

impl Subscriber {
    fn new(id: SubscriberId, label: String, sender: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            id,
            label,
            sender,
            subscriptions: RwLock::new(Subscriptions::new()),
        }
    }

    /// Queues an event for this subscriber.
    pub fn send(&self, event: SessionEvent) -> Result<(), RealtimeError> {
        self.sender
            .send(event)
            .map_err(|_| RealtimeError::ChannelClosed)
    }

    /// Whether the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn subscribe(&self, channel: Channel) -> Result<bool, RealtimeError> {
        self.subscriptions.write().subscribe(channel)
    }

    pub fn unsubscribe(&self, channel: &Channel) -> bool {
        self.subscriptions.write().unsubscribe(channel)
    }

    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.subscriptions.read().is_subscribed(channel)
    }

    /// Whether any subscription matches the event.
    pub fn matches(&self, event: &SessionEvent) -> bool {
        self.subscriptions.read().matches(event)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().count()
    }

    pub fn clear_subscriptions(&self) {
        self.subscriptions.write().clear();
    }
}

/// Creates a subscriber with its event queue.
pub(crate) fn create_subscriber(
    id: SubscriberId,
    label: impl Into<String>,
) -> (Arc<Subscriber>, SubscriberReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(Subscriber::new(id, label.into(), sender)), receiver)
}
