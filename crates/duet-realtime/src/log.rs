//! Append-only per-session event journal.

use crate::event::{EventKind, SessionEvent};
use crate::hub::EventHub;
use duet_types::now_millis;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
struct LogState {
    sessions: HashMap<String, Vec<SessionEvent>>,
    next_id: u64,
}

/// One ordered event sequence per session.
///
/// Entries are never mutated or removed. Ids are assigned under the write
/// lock, so within a session they increase in append order. Every append is
/// published on the hub before the lock is released, so subscribers see a
/// session's events in log order.
#[derive(Debug)]
pub struct EventLog {
    state: RwLock<LogState>,
    hub: Arc<EventHub>,
}

impl EventLog {
    /// Creates a log with its own hub.
    pub fn new() -> Self {
        Self::with_hub(Arc::new(EventHub::new()))
    }

    /// Creates a log that publishes on a shared hub.
    pub fn with_hub(hub: Arc<EventHub>) -> Self {
        Self {
            state: RwLock::new(LogState {
                sessions: HashMap::new(),
                next_id: 1,
            }),
            hub,
        }
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Appends an event stamped with the current time.
    pub fn append(
        &self,
        session_id: &str,
        kind: EventKind,
        user_id: Option<&str>,
        data: serde_json::Value,
    ) -> SessionEvent {
        self.append_at(session_id, kind, user_id, data, now_millis())
    }

    /// Appends an event with an explicit timestamp.
    pub fn append_at(
        &self,
        session_id: &str,
        kind: EventKind,
        user_id: Option<&str>,
        data: serde_json::Value,
        timestamp: u64,
    ) -> SessionEvent {
        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;

        let event = SessionEvent {
            id,
            session_id: session_id.to_string(),
            kind,
            user_id: user_id.map(str::to_string),
            timestamp,
            data,
        };

        state
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .push(event.clone());

        self.hub.publish(&event);
        drop(state);

        trace!(session_id = %session_id, event_id = id, event = %kind, "Event appended");
        event
    }

    /// All events of a session in append order.
    pub fn events(&self, session_id: &str) -> Vec<SessionEvent> {
        self.state
            .read()
            .sessions
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Events of a session with an id greater than `after_id`.
    pub fn events_since(&self, session_id: &str, after_id: u64) -> Vec<SessionEvent> {
        let state = self.state.read();
        let Some(events) = state.sessions.get(session_id) else {
            return Vec::new();
        };
        let start = events.partition_point(|e| e.id <= after_id);
        events[start..].to_vec()
    }

    /// Events of a session with the given type tag.
    pub fn events_of_kind(&self, session_id: &str, kind: EventKind) -> Vec<SessionEvent> {
        self.state
            .read()
            .sessions
            .get(session_id)
            .map(|events| events.iter().filter(|e| e.kind == kind).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of sessions with at least one event.
    pub fn session_count(&self) -> usize {
        self.state.read().sessions.len()
    }

    /// Number of events across all sessions.
    pub fn len(&self) -> usize {
        self.state.read().sessions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
