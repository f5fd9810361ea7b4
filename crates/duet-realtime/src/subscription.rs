//! Channel addressing for event subscriptions.

use crate::error::RealtimeError;
use crate::event::{EventCategory, SessionEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum subscriptions per subscriber.
pub const MAX_SUBSCRIPTIONS_PER_SUBSCRIBER: usize = 64;

/// A channel a subscriber can listen on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// Channel type.
    pub channel_type: ChannelType,
    /// Session or user id.
    pub identifier: String,
    /// Optional category filter, session channels only.
    pub filter: Option<EventCategory>,
}

impl Channel {
    /// Every event of a session.
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            channel_type: ChannelType::Session,
            identifier: session_id.into(),
            filter: None,
        }
    }

    /// One category of a session's events.
    pub fn session_filtered(session_id: impl Into<String>, filter: EventCategory) -> Self {
        Self {
            channel_type: ChannelType::Session,
            identifier: session_id.into(),
            filter: Some(filter),
        }
    }

    /// Events caused by one user, across sessions.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            channel_type: ChannelType::User,
            identifier: user_id.into(),
            filter: None,
        }
    }

    /// Parses a channel string.
    ///
    /// Formats:
    /// - `session:<id>` - all events of a session
    /// - `session:<id>/<category>` - one category (`participants`, `document`,
    ///   `recording`, `connection`, `chat`, `lifecycle`)
    /// - `user:<id>` - events caused by a user
    pub fn parse(s: &str) -> Result<Self, RealtimeError> {
        let (prefix, rest) = s.split_once(':').ok_or_else(|| {
            RealtimeError::InvalidChannel(format!("missing channel type prefix: {}", s))
        })?;

        let channel_type = match prefix {
            "session" => ChannelType::Session,
            "user" => ChannelType::User,
            _ => {
                return Err(RealtimeError::InvalidChannel(format!(
                    "unknown channel type: {}",
                    prefix
                )))
            }
        };

        let (identifier, filter) = match rest.split_once('/') {
            Some((id, filter)) => (id, Some(filter)),
            None => (rest, None),
        };

        if identifier.is_empty() {
            return Err(RealtimeError::InvalidChannel(format!(
                "channel identifier cannot be empty: {}",
                s
            )));
        }

        let filter = match (channel_type, filter) {
            (_, None) => None,
            (ChannelType::User, Some(_)) => {
                return Err(RealtimeError::InvalidChannel(format!(
                    "user channels take no filter: {}",
                    s
                )))
            }
            (ChannelType::Session, Some(f)) => Some(EventCategory::parse(f).ok_or_else(|| {
                RealtimeError::InvalidChannel(format!("unknown event category: {}", f))
            })?),
        };

        Ok(Channel {
            channel_type,
            identifier: identifier.to_string(),
            filter,
        })
    }

    /// Whether an event is delivered on this channel.
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self.channel_type {
            ChannelType::Session => {
                self.identifier == event.session_id
                    && self.filter.map_or(true, |f| f == event.category())
            }
            ChannelType::User => event.user_id.as_deref() == Some(self.identifier.as_str()),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.channel_type {
            ChannelType::Session => "session",
            ChannelType::User => "user",
        };

        match &self.filter {
            Some(filter) => write!(f, "{}:{}/{}", prefix, self.identifier, filter),
            None => write!(f, "{}:{}", prefix, self.identifier),
        }
    }
}

/// Channel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Session channel (e.g., session:abc).
    Session,
    /// User channel (e.g., user:alice).
    User,
}

/// The set of channels one subscriber listens on.
#[derive(Debug, Default)]
pub struct Subscriptions {
    channels: HashSet<Channel>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel. Returns false if it was already present.
    pub fn subscribe(&mut self, channel: Channel) -> Result<bool, RealtimeError> {
        if self.channels.contains(&channel) {
            return Ok(false);
        }
        if self.channels.len() >= MAX_SUBSCRIPTIONS_PER_SUBSCRIBER {
            return Err(RealtimeError::SubscriptionLimit(
                MAX_SUBSCRIPTIONS_PER_SUBSCRIBER,
            ));
        }
        Ok(self.channels.insert(channel))
    }

    pub fn unsubscribe(&mut self, channel: &Channel) -> bool {
        self.channels.remove(channel)
    }

    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.channels.contains(channel)
    }

    /// Whether any channel matches the event.
    pub fn matches(&self, event: &SessionEvent) -> bool {
        self.channels.iter().any(|c| c.matches(event))
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
