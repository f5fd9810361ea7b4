//! Typed publish/subscribe hub for session events.

use crate::error::RealtimeError;
use crate::event::SessionEvent;
use crate::subscriber::{create_subscriber, Subscriber, SubscriberId, SubscriberReceiver};
use crate::subscription::Channel;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the firehose broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Maximum number of registered subscribers.
const MAX_SUBSCRIBERS: usize = 10_000;

/// Routes published events to the subscribers whose channels match.
#[derive(Debug)]
pub struct EventHub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    stats: RwLock<HubStats>,
}

impl EventHub {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            subscribers: RwLock::new(HashMap::new()),
            event_tx,
            stats: RwLock::new(HubStats::default()),
        }
    }

    /// Registers a handler and returns its event queue.
    pub fn register(
        &self,
        label: impl Into<String>,
    ) -> Result<(Arc<Subscriber>, SubscriberReceiver), RealtimeError> {
        let mut subscribers = self.subscribers.write();
        if subscribers.len() >= MAX_SUBSCRIBERS {
            return Err(RealtimeError::SubscriberLimit(MAX_SUBSCRIBERS));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (subscriber, receiver) = create_subscriber(id.clone(), label);
        subscribers.insert(id.clone(), subscriber.clone());
        drop(subscribers);

        self.stats.write().total_registrations += 1;
        info!(subscriber_id = %id, label = %subscriber.label, "Subscriber registered");

        Ok((subscriber, receiver))
    }

    /// Registers a handler already listening on one channel.
    pub fn subscribe(
        &self,
        label: impl Into<String>,
        channel: &str,
    ) -> Result<(Arc<Subscriber>, SubscriberReceiver), RealtimeError> {
        let parsed = Channel::parse(channel)?;
        let (subscriber, receiver) = self.register(label)?;
        self.add_channel(&subscriber.id, parsed)?;
        Ok((subscriber, receiver))
    }

    /// Adds a channel to a registered subscriber.
    pub fn add_channel(&self, subscriber_id: &str, channel: Channel) -> Result<bool, RealtimeError> {
        let subscriber = self
            .get(subscriber_id)
            .ok_or_else(|| RealtimeError::SubscriberNotFound(subscriber_id.to_string()))?;

        let is_new = subscriber.subscribe(channel.clone())?;
        if is_new {
            debug!(subscriber_id = %subscriber_id, channel = %channel, "Subscribed");
            self.stats.write().total_subscriptions += 1;
        }
        Ok(is_new)
    }

    /// Removes a channel from a registered subscriber.
    pub fn remove_channel(&self, subscriber_id: &str, channel: &Channel) -> Result<bool, RealtimeError> {
        let subscriber = self
            .get(subscriber_id)
            .ok_or_else(|| RealtimeError::SubscriberNotFound(subscriber_id.to_string()))?;

        let removed = subscriber.unsubscribe(channel);
        if removed {
            debug!(subscriber_id = %subscriber_id, channel = %channel, "Unsubscribed");
        }
        Ok(removed)
    }

    /// Unregisters a handler. Its queue closes once the hub drops its sender.
    pub fn unregister(&self, subscriber_id: &str) -> bool {
        match self.subscribers.write().remove(subscriber_id) {
            Some(subscriber) => {
                subscriber.clear_subscriptions();
                info!(subscriber_id = %subscriber_id, "Subscriber unregistered");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, subscriber_id: &str) -> Option<Arc<Subscriber>> {
        self.subscribers.read().get(subscriber_id).cloned()
    }

    /// Delivers an event to every matching subscriber and the firehose.
    ///
    /// Subscribers whose queue has been dropped are unregistered.
    pub fn publish(&self, event: &SessionEvent) -> usize {
        let mut recipients = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.values() {
                if !subscriber.matches(event) {
                    continue;
                }
                match subscriber.send(event.clone()) {
                    Ok(()) => recipients += 1,
                    Err(_) => closed.push(subscriber.id.clone()),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &closed {
                subscribers.remove(id);
            }
            debug!(count = closed.len(), "Pruned closed subscribers");
        }

        let _ = self.event_tx.send(event.clone());

        let mut stats = self.stats.write();
        stats.total_events += 1;
        stats.total_deliveries += recipients as u64;
        drop(stats);

        debug!(
            session_id = %event.session_id,
            event = %event.kind,
            recipients = recipients,
            "Event published"
        );

        recipients
    }

    /// Receives every published event, regardless of channel.
    pub fn firehose(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> HubStats {
        let mut stats = self.stats.read().clone();
        stats.current_subscribers = self.subscriber_count();
        stats
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubStats {
    /// Currently registered subscribers.
    pub current_subscribers: usize,
    /// Subscribers registered since creation.
    pub total_registrations: u64,
    /// Channel subscriptions added since creation.
    pub total_subscriptions: u64,
    /// Events published.
    pub total_events: u64,
    /// Per-subscriber deliveries.
    pub total_deliveries: u64,
}
