//! Session types and the lifecycle state machine.

use duet_types::{SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::settings::SessionSettings;
use crate::{Result, SessionError};

/// Collaboration mode. Each mode fixes a participant cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    PairProgramming,
    GroupProject,
    CodeReview,
    LiveDemo,
    Debugging,
    InterviewPractice,
    HackathonTeam,
    StudyGroup,
}

impl SessionType {
    /// Every session type.
    pub const ALL: [SessionType; 8] = [
        SessionType::PairProgramming,
        SessionType::GroupProject,
        SessionType::CodeReview,
        SessionType::LiveDemo,
        SessionType::Debugging,
        SessionType::InterviewPractice,
        SessionType::HackathonTeam,
        SessionType::StudyGroup,
    ];

    /// Maximum number of participants, the owner included.
    pub fn max_participants(&self) -> usize {
        match self {
            SessionType::PairProgramming => 2,
            SessionType::GroupProject => 6,
            SessionType::CodeReview => 5,
            SessionType::LiveDemo => 50,
            SessionType::Debugging => 4,
            SessionType::InterviewPractice => 2,
            SessionType::HackathonTeam => 8,
            SessionType::StudyGroup => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::PairProgramming => "pair-programming",
            SessionType::GroupProject => "group-project",
            SessionType::CodeReview => "code-review",
            SessionType::LiveDemo => "live-demo",
            SessionType::Debugging => "debugging",
            SessionType::InterviewPractice => "interview-practice",
            SessionType::HackathonTeam => "hackathon-team",
            SessionType::StudyGroup => "study-group",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a session.
///
/// CREATED → WAITING → ACTIVE ⇄ PAUSED → ENDED → ARCHIVED. Any live status
/// may end; nothing leaves ENDED except archiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Waiting,
    Active,
    Paused,
    Ended,
    Archived,
}

impl SessionStatus {
    /// Whether the session has ended or been archived.
    pub fn is_over(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Archived)
    }

    /// Whether document edits are accepted.
    pub fn accepts_edits(&self) -> bool {
        matches!(
            self,
            SessionStatus::Created | SessionStatus::Waiting | SessionStatus::Active
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Created => write!(f, "CREATED"),
            SessionStatus::Waiting => write!(f, "WAITING"),
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::Paused => write!(f, "PAUSED"),
            SessionStatus::Ended => write!(f, "ENDED"),
            SessionStatus::Archived => write!(f, "ARCHIVED"),
        }
    }
}

/// A bounded collaboration context.
///
/// Participants live in a separate table keyed by user id; the session keeps
/// only their ids in join order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub owner_id: UserId,
    pub participant_ids: Vec<UserId>,
    pub settings: SessionSettings,
    pub invite_code: String,
    /// Editor language, e.g. from a template.
    pub language: Option<String>,
    /// Template the session was instantiated from.
    pub template_id: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    /// Whole seconds between start (or creation) and end.
    pub duration_secs: Option<u64>,
}

impl Session {
    pub fn new(
        id: impl Into<SessionId>,
        title: impl Into<String>,
        session_type: SessionType,
        owner_id: impl Into<UserId>,
        settings: SessionSettings,
        invite_code: impl Into<String>,
        created_at: u64,
    ) -> Self {
        let owner_id = owner_id.into();
        Self {
            id: id.into(),
            title: title.into(),
            session_type,
            status: SessionStatus::Created,
            participant_ids: vec![owner_id.clone()],
            owner_id,
            settings,
            invite_code: invite_code.into(),
            language: None,
            template_id: None,
            created_at,
            started_at: None,
            ended_at: None,
            duration_secs: None,
        }
    }

    pub fn max_participants(&self) -> usize {
        self.session_type.max_participants()
    }

    pub fn participant_count(&self) -> usize {
        self.participant_ids.len()
    }

    pub fn is_full(&self) -> bool {
        self.participant_count() >= self.max_participants()
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    fn invalid(&self, action: &str) -> SessionError {
        SessionError::InvalidState {
            session_id: self.id.clone(),
            action: action.to_string(),
            current: self.status.to_string(),
        }
    }

    /// CREATED → WAITING once a second participant is present.
    pub(crate) fn promote_if_waiting(&mut self) -> bool {
        if self.status == SessionStatus::Created && self.participant_count() >= 2 {
            self.status = SessionStatus::Waiting;
            return true;
        }
        false
    }

    /// Starts the session.
    pub fn start(&mut self, now: u64) -> Result<()> {
        match self.status {
            SessionStatus::Created | SessionStatus::Waiting => {
                self.status = SessionStatus::Active;
                self.started_at = Some(now);
                Ok(())
            }
            _ => Err(self.invalid("start")),
        }
    }

    /// Pauses an active session.
    pub fn pause(&mut self) -> Result<()> {
        if self.status != SessionStatus::Active {
            return Err(self.invalid("pause"));
        }
        self.status = SessionStatus::Paused;
        Ok(())
    }

    /// Resumes a paused session.
    pub fn resume(&mut self) -> Result<()> {
        if self.status != SessionStatus::Paused {
            return Err(self.invalid("resume"));
        }
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// Ends the session and computes its duration.
    pub fn end(&mut self, now: u64) -> Result<()> {
        if self.status.is_over() {
            return Err(self.invalid("end"));
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
        let from = self.started_at.unwrap_or(self.created_at);
        self.duration_secs = Some(now.saturating_sub(from) / 1000);
        Ok(())
    }

    /// Archives an ended session.
    pub fn archive(&mut self) -> Result<()> {
        if self.status != SessionStatus::Ended {
            return Err(self.invalid("archive"));
        }
        self.status = SessionStatus::Archived;
        Ok(())
    }
}
