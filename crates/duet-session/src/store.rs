//! In-memory storage for sessions and invitations.

use duet_ot::SequencingAuthority;
use duet_types::{SessionId, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::analytics::SessionAnalytics;
use crate::invitation::Invitation;
use crate::participant::Participant;
use crate::permission::PermissionLevel;
use crate::session::Session;
use crate::{Result, SessionError};

/// Everything owned by one session, guarded by one lock.
///
/// Participants are stored by id; `session.participant_ids` holds the join
/// order.
#[derive(Debug)]
pub struct SessionRecord {
    pub session: Session,
    pub participants: HashMap<UserId, Participant>,
    pub analytics: SessionAnalytics,
    /// Users pre-approved for sessions that require approval.
    pub approved: HashSet<UserId>,
    pub authority: Arc<SequencingAuthority>,
}

impl SessionRecord {
    pub fn new(session: Session, owner: Participant, analytics: SessionAnalytics) -> Self {
        let authority = Arc::new(SequencingAuthority::new(session.id.clone()));
        authority.register_author(&owner.user_id);

        let mut participants = HashMap::new();
        participants.insert(owner.user_id.clone(), owner);

        Self {
            session,
            participants,
            analytics,
            approved: HashSet::new(),
            authority,
        }
    }

    pub fn participant(&self, user_id: &str) -> Result<&Participant> {
        self.participants
            .get(user_id)
            .ok_or_else(|| SessionError::NotAParticipant {
                session_id: self.session.id.clone(),
                user_id: user_id.to_string(),
            })
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Result<&mut Participant> {
        let session_id = &self.session.id;
        self.participants
            .get_mut(user_id)
            .ok_or_else(|| SessionError::NotAParticipant {
                session_id: session_id.clone(),
                user_id: user_id.to_string(),
            })
    }

    /// Fails unless `user_id` holds at least `required`.
    pub fn require(&self, user_id: &str, required: PermissionLevel) -> Result<&Participant> {
        let participant = self.participant(user_id)?;
        if !participant.permission.has(required) {
            return Err(SessionError::InsufficientPermission {
                session_id: self.session.id.clone(),
                user_id: user_id.to_string(),
                required,
            });
        }
        Ok(participant)
    }

    /// Fails unless `user_id` owns the session.
    pub fn require_owner(&self, user_id: &str) -> Result<()> {
        if !self.session.is_owner(user_id) {
            return Err(SessionError::NotOwner {
                session_id: self.session.id.clone(),
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// Participants in join order.
    pub fn ordered_participants(&self) -> Vec<Participant> {
        self.session
            .participant_ids
            .iter()
            .filter_map(|id| self.participants.get(id).cloned())
            .collect()
    }

    pub(crate) fn add_participant(&mut self, participant: Participant) {
        self.session.participant_ids.push(participant.user_id.clone());
        self.authority.register_author(&participant.user_id);
        self.participants
            .insert(participant.user_id.clone(), participant);
    }

    pub(crate) fn remove_participant(&mut self, user_id: &str) -> Option<Participant> {
        self.session.participant_ids.retain(|id| id != user_id);
        self.authority.remove_author(user_id);
        self.participants.remove(user_id)
    }

    /// Number of participants holding OWNER.
    pub fn owner_count(&self) -> usize {
        self.participants.values().filter(|p| p.is_owner()).count()
    }
}

/// Thread-safe storage for sessions and invitations.
///
/// The session map lock is held only to find a record; mutations run under
/// the record's own mutex.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionRecord>>>>,
    /// Upper-case invite code to session id.
    invite_codes: RwLock<HashMap<String, SessionId>>,
    invitations: RwLock<HashMap<String, Invitation>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims an invite code for a session. Returns false on collision.
    pub fn reserve_code(&self, code: &str, session_id: &str) -> bool {
        let mut codes = self.invite_codes.write();
        if codes.contains_key(code) {
            return false;
        }
        codes.insert(code.to_string(), session_id.to_string());
        true
    }

    pub fn insert(&self, record: SessionRecord) -> Arc<Mutex<SessionRecord>> {
        let id = record.session.id.clone();
        let record = Arc::new(Mutex::new(record));
        self.sessions.write().insert(id, record.clone());
        record
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<Mutex<SessionRecord>>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Runs `f` with exclusive access to one session.
    pub fn with_session<T, F>(&self, session_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionRecord) -> Result<T>,
    {
        let record = self.get(session_id)?;
        let mut guard = record.lock();
        f(&mut guard)
    }

    /// Frees a session's invite code. Returns false if the code belonged to
    /// another session or to none.
    pub fn release_code(&self, code: &str, session_id: &str) -> bool {
        let mut codes = self.invite_codes.write();
        if codes.get(code).map(String::as_str) != Some(session_id) {
            return false;
        }
        codes.remove(code);
        true
    }

    pub fn session_for_code(&self, code: &str) -> Option<SessionId> {
        self.invite_codes.read().get(code).cloned()
    }

    /// Snapshots of every session.
    pub fn list(&self) -> Vec<Session> {
        let records: Vec<_> = self.sessions.read().values().cloned().collect();
        records.iter().map(|r| r.lock().session.clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    // ==================== Invitations ====================

    pub fn insert_invitation(&self, invitation: Invitation) {
        self.invitations
            .write()
            .insert(invitation.id.clone(), invitation);
    }

    pub fn get_invitation(&self, id: &str) -> Result<Invitation> {
        self.invitations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::InvitationNotFound {
                invitation_id: id.to_string(),
            })
    }

    /// Updates an invitation in place.
    pub fn update_invitation<F>(&self, id: &str, f: F) -> Result<Invitation>
    where
        F: FnOnce(&mut Invitation) -> Result<()>,
    {
        let mut invitations = self.invitations.write();
        let invitation = invitations
            .get_mut(id)
            .ok_or_else(|| SessionError::InvitationNotFound {
                invitation_id: id.to_string(),
            })?;
        f(invitation)?;
        Ok(invitation.clone())
    }

    pub fn invitations_for(&self, session_id: &str) -> Vec<Invitation> {
        let mut list: Vec<_> = self
            .invitations
            .read()
            .values()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect();
        list.sort_by_key(|i| i.created_at);
        list
    }

    /// Removes every invitation for which `expired` returns true.
    pub fn purge_invitations<F>(&self, expired: F) -> usize
    where
        F: Fn(&Invitation) -> bool,
    {
        let mut invitations = self.invitations.write();
        let before = invitations.len();
        invitations.retain(|_, i| !expired(i));
        before - invitations.len()
    }
}
