//! Per-session participation accumulators.

use duet_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counters collected over a session's life.
///
/// Per-user maps are keyed by participant id and lose a user's entries when
/// that user leaves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    pub joined_at: HashMap<UserId, u64>,
    pub operations_by: HashMap<UserId, u64>,
    pub messages_by: HashMap<UserId, u64>,
    pub total_joins: u64,
    pub total_operations: u64,
    pub total_messages: u64,
    pub peak_participants: usize,
    pub participants_at_end: Option<usize>,
    /// Session duration divided by the participant count at end.
    pub average_participation_secs: Option<f64>,
}

impl SessionAnalytics {
    /// Accumulators seeded with the owner.
    pub fn new(owner_id: &str, now: u64) -> Self {
        let mut analytics = Self::default();
        analytics.track_join(owner_id, now, 1);
        analytics
    }

    pub fn track_join(&mut self, user_id: &str, now: u64, participant_count: usize) {
        self.joined_at.insert(user_id.to_string(), now);
        self.operations_by.entry(user_id.to_string()).or_insert(0);
        self.messages_by.entry(user_id.to_string()).or_insert(0);
        self.total_joins += 1;
        self.peak_participants = self.peak_participants.max(participant_count);
    }

    pub fn track_leave(&mut self, user_id: &str) {
        self.joined_at.remove(user_id);
        self.operations_by.remove(user_id);
        self.messages_by.remove(user_id);
    }

    pub fn record_operation(&mut self, user_id: &str) {
        *self.operations_by.entry(user_id.to_string()).or_insert(0) += 1;
        self.total_operations += 1;
    }

    pub fn record_message(&mut self, user_id: &str) {
        *self.messages_by.entry(user_id.to_string()).or_insert(0) += 1;
        self.total_messages += 1;
    }

    pub fn finalize(&mut self, duration_secs: u64, participant_count: usize) {
        self.participants_at_end = Some(participant_count);
        self.average_participation_secs = (participant_count > 0)
            .then(|| duration_secs as f64 / participant_count as f64);
    }
}
