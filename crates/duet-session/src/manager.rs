//! Session manager: admission, lifecycle, permissions and document entry point.

use std::sync::Arc;
use std::time::Duration;

use duet_ot::{CommittedOperation, DocumentSnapshot, Operation, SequencingAuthority};
use duet_realtime::{EventKind, EventLog};
use duet_types::{now_millis, ChatMessage, SessionId, UserIdentity};
use rand::thread_rng;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::analytics::SessionAnalytics;
use crate::invitation::{Invitation, InvitationStatus};
use crate::invite_code::{generate_invite_code, invite_link, normalize_invite_code};
use crate::participant::{
    ConnectionStatus, ConsentSnapshot, CursorPosition, Participant, SelectionRange,
};
use crate::permission::PermissionLevel;
use crate::session::{Session, SessionType};
use crate::settings::{SessionSettings, SettingsOverride};
use crate::store::{SessionRecord, SessionStore};
use crate::template::{SessionTemplate, TemplateRegistry};
use crate::{Result, SessionError};

/// Attempts at drawing an unused invite code before giving up.
const INVITE_CODE_ATTEMPTS: usize = 32;

/// Longest accepted chat message, in characters.
pub const MAX_CHAT_LENGTH: usize = 4000;

/// Closes transport connections on behalf of the session manager.
///
/// Implemented by whatever owns the peer connections. Calls must return only
/// once the connections are closed.
pub trait ConnectionControl: Send + Sync {
    /// Closes every connection of one participant.
    fn close_participant(&self, session_id: &str, user_id: &str);

    /// Closes every connection in a session.
    fn close_session(&self, session_id: &str);
}

/// Session manager settings.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Base URL used to build invite links.
    pub base_url: String,
    /// How long an invitation stays acceptable.
    pub invitation_ttl: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            invitation_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Owns every session and enforces admission, permission and lifecycle
/// rules.
///
/// Each mutation runs its precondition checks and its effects under the
/// session's own lock, and appends its event before releasing it.
pub struct SessionManager {
    store: SessionStore,
    events: Arc<EventLog>,
    templates: TemplateRegistry,
    config: SessionManagerConfig,
    connections: Option<Arc<dyn ConnectionControl>>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, events: Arc<EventLog>) -> Self {
        Self {
            store: SessionStore::new(),
            events,
            templates: TemplateRegistry::with_builtins(),
            config,
            connections: None,
        }
    }

    /// Routes connection teardown through `control`.
    pub fn with_connection_control(mut self, control: Arc<dyn ConnectionControl>) -> Self {
        self.connections = Some(control);
        self
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    // ==================== Creation ====================

    /// Creates a session owned by `owner`.
    pub fn create_session(
        &self,
        owner: &UserIdentity,
        title: &str,
        session_type: SessionType,
        overrides: &SettingsOverride,
    ) -> Result<Session> {
        let (settings, _) = SessionSettings::for_type(session_type).merged(overrides)?;
        self.create_with(owner, title, session_type, settings, None)
    }

    /// Creates a session from a template and bumps its usage count.
    pub fn create_session_from_template(
        &self,
        owner: &UserIdentity,
        template_id: &str,
        title: Option<&str>,
        overrides: &SettingsOverride,
    ) -> Result<Session> {
        let template = self.templates.get(template_id)?;
        let (settings, _) = template.settings.merged(overrides)?;
        let title = title.unwrap_or(&template.name);

        let session = self.create_with(
            owner,
            title,
            template.session_type,
            settings,
            Some(&template),
        )?;
        self.templates.record_usage(template_id)?;
        Ok(session)
    }

    fn create_with(
        &self,
        owner: &UserIdentity,
        title: &str,
        session_type: SessionType,
        settings: SessionSettings,
        template: Option<&SessionTemplate>,
    ) -> Result<Session> {
        if !owner.is_valid() {
            return Err(SessionError::Validation(
                "owner id cannot be empty".to_string(),
            ));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::Validation(
                "title cannot be empty".to_string(),
            ));
        }

        let session_id = duet_types::new_id();
        let invite_code = self.allocate_invite_code(&session_id)?;
        let now = now_millis();

        let mut session = Session::new(
            session_id.clone(),
            title,
            session_type,
            owner.id.clone(),
            settings,
            invite_code,
            now,
        );
        if let Some(template) = template {
            session.language = Some(template.language.clone());
            session.template_id = Some(template.id.clone());
        }

        let owner_participant = Participant::new(owner, PermissionLevel::Owner, now);
        let analytics = SessionAnalytics::new(&owner.id, now);
        let record = SessionRecord::new(session.clone(), owner_participant, analytics);

        let record = self.store.insert(record);
        // Held so no join event can precede the creation event.
        let guard = record.lock();
        self.events.append(
            &session_id,
            EventKind::SessionCreated,
            Some(&owner.id),
            json!({
                "title": session.title,
                "sessionType": session.session_type,
                "inviteCode": session.invite_code,
                "templateId": session.template_id,
                "maxParticipants": session.max_participants(),
            }),
        );
        drop(guard);

        info!(
            session_id = %session_id,
            owner_id = %owner.id,
            session_type = %session_type,
            "Session created"
        );

        Ok(session)
    }

    fn allocate_invite_code(&self, session_id: &str) -> Result<String> {
        let mut rng = thread_rng();
        for _ in 0..INVITE_CODE_ATTEMPTS {
            let code = generate_invite_code(&mut rng);
            if self.store.reserve_code(&code, session_id) {
                return Ok(code);
            }
            debug!(session_id = %session_id, "Invite code collision, retrying");
        }
        Err(SessionError::Validation(
            "could not allocate an invite code".to_string(),
        ))
    }

    // ==================== Admission ====================

    /// Joins a session with its invite code.
    ///
    /// Public sessions accept any code, including none.
    pub fn join_session(
        &self,
        session_id: &str,
        user: &UserIdentity,
        invite_code: Option<&str>,
    ) -> Result<Participant> {
        if !user.is_valid() {
            return Err(SessionError::Validation("user id cannot be empty".to_string()));
        }

        self.store.with_session(session_id, |rec| {
            Self::check_admission(rec, &user.id)?;

            let session = &rec.session;
            if !session.settings.is_public {
                let supplied = invite_code.and_then(normalize_invite_code);
                if supplied.as_deref() != Some(session.invite_code.as_str()) {
                    return Err(SessionError::InvalidInviteCode {
                        session_id: session_id.to_string(),
                    });
                }
            }

            if session.settings.require_approval && !rec.approved.contains(&user.id) {
                return Err(SessionError::ApprovalRequired {
                    session_id: session_id.to_string(),
                    user_id: user.id.clone(),
                });
            }

            let permission = rec.session.settings.default_permission;
            Ok(self.admit(rec, user, permission, None))
        })
    }

    /// Checks shared by every way of entering a session.
    fn check_admission(rec: &SessionRecord, user_id: &str) -> Result<()> {
        let session = &rec.session;
        if session.status.is_over() {
            return Err(SessionError::SessionEnded {
                session_id: session.id.clone(),
            });
        }
        if rec.participants.contains_key(user_id) {
            return Err(SessionError::AlreadyJoined {
                session_id: session.id.clone(),
                user_id: user_id.to_string(),
            });
        }
        if session.is_full() {
            return Err(SessionError::SessionFull {
                session_id: session.id.clone(),
                max: session.max_participants(),
            });
        }
        Ok(())
    }

    fn admit(
        &self,
        rec: &mut SessionRecord,
        user: &UserIdentity,
        permission: PermissionLevel,
        invitation_id: Option<&str>,
    ) -> Participant {
        let now = now_millis();
        let participant = Participant::new(user, permission, now);
        rec.add_participant(participant.clone());

        let count = rec.session.participant_count();
        rec.analytics.track_join(&user.id, now, count);
        let promoted = rec.session.promote_if_waiting();

        self.events.append(
            &rec.session.id,
            EventKind::ParticipantJoined,
            Some(&user.id),
            json!({
                "displayName": participant.display_name,
                "role": participant.role,
                "permission": permission,
                "participantCount": count,
                "status": rec.session.status,
                "invitationId": invitation_id,
            }),
        );

        info!(
            session_id = %rec.session.id,
            user_id = %user.id,
            permission = %permission,
            participants = count,
            "Participant joined"
        );
        if promoted {
            info!(session_id = %rec.session.id, "Session waiting to start");
        }

        participant
    }

    /// Removes a participant.
    ///
    /// Closes the participant's connections and revokes its commit rights.
    /// When the owner leaves, ownership passes to the remaining participant
    /// with the highest permission, earliest joined first; if nobody remains
    /// the session ends.
    pub fn leave_session(&self, session_id: &str, user_id: &str) -> Result<()> {
        let ended = self.store.with_session(session_id, |rec| {
            rec.participant(user_id)?;
            let was_owner = rec.session.is_owner(user_id);

            rec.remove_participant(user_id);
            rec.analytics.track_leave(user_id);

            let remaining = rec.session.participant_count();
            self.events.append(
                session_id,
                EventKind::ParticipantLeft,
                Some(user_id),
                json!({ "participantCount": remaining, "wasOwner": was_owner }),
            );
            info!(session_id = %session_id, user_id = %user_id, remaining, "Participant left");

            if !was_owner {
                return Ok(false);
            }

            if remaining == 0 {
                if rec.session.status.is_over() {
                    return Ok(false);
                }
                self.end_locked(rec, Some(user_id))?;
                return Ok(true);
            }

            if let Some(successor) = Self::successor(rec) {
                self.hand_over(rec, user_id, &successor, true)?;
            }
            Ok(false)
        })?;

        if let Some(connections) = &self.connections {
            connections.close_participant(session_id, user_id);
            if ended {
                connections.close_session(session_id);
            }
        }
        Ok(())
    }

    /// Highest permission, earliest joined.
    fn successor(rec: &SessionRecord) -> Option<String> {
        let mut best: Option<&Participant> = None;
        for id in &rec.session.participant_ids {
            if let Some(p) = rec.participants.get(id) {
                if best.map_or(true, |b| p.permission > b.permission) {
                    best = Some(p);
                }
            }
        }
        best.map(|p| p.user_id.clone())
    }

    /// Makes `to` the owner. `from` is demoted to ADMIN if still present.
    fn hand_over(
        &self,
        rec: &mut SessionRecord,
        from: &str,
        to: &str,
        automatic: bool,
    ) -> Result<()> {
        if let Some(previous) = rec.participants.get_mut(from) {
            previous.permission = PermissionLevel::Admin;
        }
        rec.participant_mut(to)?.permission = PermissionLevel::Owner;
        rec.session.owner_id = to.to_string();

        self.events.append(
            &rec.session.id,
            EventKind::OwnershipTransferred,
            Some(from),
            json!({ "from": from, "to": to, "automatic": automatic }),
        );
        info!(session_id = %rec.session.id, from = %from, to = %to, automatic, "Ownership transferred");
        Ok(())
    }

    /// Pre-approves a user for a session that requires approval.
    pub fn approve_user(&self, session_id: &str, actor_id: &str, user_id: &str) -> Result<()> {
        self.store.with_session(session_id, |rec| {
            rec.require(actor_id, PermissionLevel::Admin)?;
            if rec.approved.insert(user_id.to_string()) {
                self.events.append(
                    session_id,
                    EventKind::ParticipantApproved,
                    Some(actor_id),
                    json!({ "userId": user_id }),
                );
                debug!(session_id = %session_id, user_id = %user_id, "User approved");
            }
            Ok(())
        })
    }

    // ==================== Lifecycle ====================

    /// Starts the session. Owner only.
    pub fn start_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.store.with_session(session_id, |rec| {
            rec.require_owner(user_id)?;
            rec.session.start(now_millis())?;

            self.events.append(
                session_id,
                EventKind::SessionStarted,
                Some(user_id),
                json!({ "participantCount": rec.session.participant_count() }),
            );
            info!(session_id = %session_id, "Session started");
            Ok(rec.session.clone())
        })
    }

    /// Pauses an active session. Owner or admin.
    pub fn pause_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.store.with_session(session_id, |rec| {
            rec.require(user_id, PermissionLevel::Admin)?;
            rec.session.pause()?;

            self.events
                .append(session_id, EventKind::SessionPaused, Some(user_id), json!({}));
            info!(session_id = %session_id, user_id = %user_id, "Session paused");
            Ok(rec.session.clone())
        })
    }

    /// Resumes a paused session. Owner or admin.
    pub fn resume_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.store.with_session(session_id, |rec| {
            rec.require(user_id, PermissionLevel::Admin)?;
            rec.session.resume()?;

            self.events
                .append(session_id, EventKind::SessionResumed, Some(user_id), json!({}));
            info!(session_id = %session_id, user_id = %user_id, "Session resumed");
            Ok(rec.session.clone())
        })
    }

    /// Ends the session. Owner or admin.
    pub fn end_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        let session = self.store.with_session(session_id, |rec| {
            rec.require(user_id, PermissionLevel::Admin)?;
            self.end_locked(rec, Some(user_id))?;
            Ok(rec.session.clone())
        })?;

        if let Some(connections) = &self.connections {
            connections.close_session(session_id);
        }
        Ok(session)
    }

    fn end_locked(&self, rec: &mut SessionRecord, actor: Option<&str>) -> Result<()> {
        let now = now_millis();
        rec.session.end(now)?;

        let duration = rec.session.duration_secs.unwrap_or(0);
        let count = rec.session.participant_count();
        rec.analytics.finalize(duration, count);
        rec.authority.close();

        self.events.append(
            &rec.session.id,
            EventKind::SessionEnded,
            actor,
            json!({
                "durationSecs": duration,
                "participantCount": count,
                "averageParticipationSecs": rec.analytics.average_participation_secs,
                "documentVersion": rec.authority.version(),
            }),
        );
        info!(session_id = %rec.session.id, duration_secs = duration, "Session ended");
        Ok(())
    }

    /// Archives an ended session once post-processing is complete.
    pub fn archive_session(&self, session_id: &str) -> Result<Session> {
        let archived = self.store.with_session(session_id, |rec| {
            rec.session.archive()?;
            self.events
                .append(session_id, EventKind::SessionArchived, None, json!({}));
            Ok(rec.session.clone())
        })?;

        // The code can now be handed to a new session.
        let released = self.store.release_code(&archived.invite_code, session_id);
        info!(session_id = %session_id, released, "Session archived");
        Ok(archived)
    }

    // ==================== Settings & permissions ====================

    /// Applies a settings override. Owner or admin.
    pub fn update_settings(
        &self,
        session_id: &str,
        actor_id: &str,
        changes: &SettingsOverride,
    ) -> Result<SessionSettings> {
        self.store.with_session(session_id, |rec| {
            rec.require(actor_id, PermissionLevel::Admin)?;
            let (next, delta) = rec.session.settings.merged(changes)?;
            if delta.is_empty() {
                return Ok(next);
            }

            rec.session.settings = next.clone();
            self.events.append(
                session_id,
                EventKind::SettingsUpdated,
                Some(actor_id),
                json!({ "changes": delta }),
            );
            info!(session_id = %session_id, actor_id = %actor_id, fields = delta.len(), "Settings updated");
            Ok(next)
        })
    }

    /// Changes a participant's permission level. Owner or admin.
    ///
    /// The owner's level cannot be changed this way and OWNER cannot be
    /// granted; use [`SessionManager::transfer_ownership`]. Actors can only
    /// change participants below their own level.
    pub fn change_permission(
        &self,
        session_id: &str,
        actor_id: &str,
        target_id: &str,
        level: PermissionLevel,
    ) -> Result<Participant> {
        self.store.with_session(session_id, |rec| {
            let actor_level = rec.require(actor_id, PermissionLevel::Admin)?.permission;
            if level == PermissionLevel::Owner {
                return Err(SessionError::Validation(
                    "OWNER can only be granted by transferring ownership".to_string(),
                ));
            }

            let target = rec.participant(target_id)?;
            if target.is_owner() {
                return Err(SessionError::Validation(
                    "the owner's permission cannot be changed".to_string(),
                ));
            }
            // The actor must outrank the target and hold the new level.
            let required = target.permission.above().max(level);
            if !actor_level.has(required) {
                return Err(SessionError::InsufficientPermission {
                    session_id: session_id.to_string(),
                    user_id: actor_id.to_string(),
                    required,
                });
            }

            let from = target.permission;
            if from == level {
                return Ok(target.clone());
            }

            let target = rec.participant_mut(target_id)?;
            target.permission = level;
            let updated = target.clone();

            self.events.append(
                session_id,
                EventKind::PermissionChanged,
                Some(actor_id),
                json!({ "targetId": target_id, "from": from, "to": level }),
            );
            info!(
                session_id = %session_id,
                target_id = %target_id,
                from = %from,
                to = %level,
                "Permission changed"
            );
            Ok(updated)
        })
    }

    /// Hands ownership to another participant. Owner only.
    ///
    /// The former owner becomes ADMIN.
    pub fn transfer_ownership(&self, session_id: &str, actor_id: &str, target_id: &str) -> Result<()> {
        self.store.with_session(session_id, |rec| {
            rec.require_owner(actor_id)?;
            if actor_id == target_id {
                return Err(SessionError::Validation(
                    "cannot transfer ownership to yourself".to_string(),
                ));
            }
            rec.participant(target_id)?;
            self.hand_over(rec, actor_id, target_id, false)
        })
    }

    // ==================== Invitations ====================

    /// Invites a user. The inviter must be owner or admin.
    pub fn create_invitation(
        &self,
        session_id: &str,
        inviter_id: &str,
        invitee_id: &str,
        permission: PermissionLevel,
    ) -> Result<Invitation> {
        if permission == PermissionLevel::Owner {
            return Err(SessionError::Validation(
                "invitations cannot grant OWNER".to_string(),
            ));
        }

        self.store.with_session(session_id, |rec| {
            rec.require(inviter_id, PermissionLevel::Admin)?;
            if rec.session.status.is_over() {
                return Err(SessionError::SessionEnded {
                    session_id: session_id.to_string(),
                });
            }
            if rec.participants.contains_key(invitee_id) {
                return Err(SessionError::AlreadyJoined {
                    session_id: session_id.to_string(),
                    user_id: invitee_id.to_string(),
                });
            }

            let ttl_ms = u64::try_from(self.config.invitation_ttl.as_millis()).unwrap_or(u64::MAX);
            let invitation = Invitation::new(
                session_id,
                inviter_id,
                invitee_id,
                permission,
                now_millis(),
                ttl_ms,
            );
            self.store.insert_invitation(invitation.clone());

            self.events.append(
                session_id,
                EventKind::InvitationCreated,
                Some(inviter_id),
                json!({
                    "invitationId": invitation.id,
                    "inviteeId": invitee_id,
                    "permission": permission,
                    "expiresAt": invitation.expires_at,
                }),
            );
            debug!(session_id = %session_id, invitation_id = %invitation.id, "Invitation created");
            Ok(invitation)
        })
    }

    /// Accepts an invitation and joins its session.
    pub fn accept_invitation(&self, invitation_id: &str, user: &UserIdentity) -> Result<Participant> {
        self.accept_invitation_at(invitation_id, user, now_millis())
    }

    /// Accepts an invitation as of `now`.
    ///
    /// Invitations bypass the invite code and approval checks but not the
    /// participant cap.
    pub fn accept_invitation_at(
        &self,
        invitation_id: &str,
        user: &UserIdentity,
        now: u64,
    ) -> Result<Participant> {
        let invitation = self.store.get_invitation(invitation_id)?;
        invitation.check_resolvable(&user.id, now)?;

        self.store.with_session(&invitation.session_id, |rec| {
            Self::check_admission(rec, &user.id)?;

            let accepted = self.store.update_invitation(invitation_id, |inv| {
                inv.check_resolvable(&user.id, now)?;
                inv.resolve(InvitationStatus::Accepted, now);
                Ok(())
            })?;

            self.events.append(
                &accepted.session_id,
                EventKind::InvitationAccepted,
                Some(&user.id),
                json!({ "invitationId": invitation_id }),
            );
            Ok(self.admit(rec, user, accepted.permission, Some(invitation_id)))
        })
    }

    /// Declines an invitation.
    pub fn decline_invitation(&self, invitation_id: &str, user_id: &str) -> Result<Invitation> {
        let now = now_millis();
        let invitation = self.store.get_invitation(invitation_id)?;

        self.store.with_session(&invitation.session_id, |_rec| {
            let declined = self.store.update_invitation(invitation_id, |inv| {
                inv.check_resolvable(user_id, now)?;
                inv.resolve(InvitationStatus::Declined, now);
                Ok(())
            })?;

            self.events.append(
                &declined.session_id,
                EventKind::InvitationDeclined,
                Some(user_id),
                json!({ "invitationId": invitation_id }),
            );
            Ok(declined)
        })
    }

    /// Drops every invitation whose expiry is before `now`.
    pub fn purge_expired_invitations(&self, now: u64) -> usize {
        let purged = self.store.purge_invitations(|inv| inv.is_expired(now));
        if purged > 0 {
            debug!(purged, "Purged expired invitations");
        }
        purged
    }

    pub fn get_invitation(&self, invitation_id: &str) -> Result<Invitation> {
        self.store.get_invitation(invitation_id)
    }

    pub fn invitations(&self, session_id: &str) -> Vec<Invitation> {
        self.store.invitations_for(session_id)
    }

    // ==================== Presence ====================

    /// Records a participant's transport status.
    ///
    /// Losing the connection never ends the session.
    pub fn set_connection_status(
        &self,
        session_id: &str,
        user_id: &str,
        status: ConnectionStatus,
    ) -> Result<()> {
        self.store.with_session(session_id, |rec| {
            let participant = rec.participant_mut(user_id)?;
            let previous = participant.connection_status;
            if previous == status {
                return Ok(());
            }
            participant.connection_status = status;
            participant.touch(now_millis());

            let kind = match status {
                ConnectionStatus::Disconnected => Some(EventKind::ConnectionLost),
                ConnectionStatus::Connected => Some(EventKind::ConnectionRestored),
                ConnectionStatus::Reconnecting => None,
            };

            if let Some(kind) = kind {
                self.events.append(
                    session_id,
                    kind,
                    Some(user_id),
                    json!({ "from": previous, "to": status }),
                );
            }

            if status == ConnectionStatus::Disconnected {
                warn!(session_id = %session_id, user_id = %user_id, "Participant disconnected");
            } else {
                debug!(session_id = %session_id, user_id = %user_id, status = %status, "Connection status changed");
            }
            Ok(())
        })
    }

    /// Updates a participant's cursor and selection.
    pub fn update_cursor(
        &self,
        session_id: &str,
        user_id: &str,
        cursor: Option<CursorPosition>,
        selection: Option<SelectionRange>,
    ) -> Result<()> {
        self.store.with_session(session_id, |rec| {
            let participant = rec.participant_mut(user_id)?;
            participant.cursor = cursor;
            participant.selection = selection;
            participant.touch(now_millis());
            Ok(())
        })
    }

    /// Records a participant's answer to the recording consent prompt.
    pub fn set_recording_consent(&self, session_id: &str, user_id: &str, consent: bool) -> Result<()> {
        self.store.with_session(session_id, |rec| {
            let participant = rec.participant_mut(user_id)?;
            if participant.recording_consent == consent {
                return Ok(());
            }
            participant.recording_consent = consent;

            self.events.append(
                session_id,
                EventKind::ConsentChanged,
                Some(user_id),
                json!({ "consent": consent }),
            );
            Ok(())
        })
    }

    /// Effective recording consent of every current participant.
    pub fn consent_snapshot(&self, session_id: &str) -> Result<ConsentSnapshot> {
        self.store.with_session(session_id, |rec| {
            Ok(ConsentSnapshot {
                session_id: session_id.to_string(),
                recording_enabled: rec.session.settings.recording_enabled,
                consent_required: rec.session.settings.recording_consent_required,
                participants: rec
                    .participants
                    .values()
                    .map(|p| (p.user_id.clone(), p.consents_to_recording()))
                    .collect(),
            })
        })
    }

    // ==================== Document ====================

    /// Commits an edit through the session's sequencing authority.
    pub fn submit_operation(&self, session_id: &str, operation: Operation) -> Result<CommittedOperation> {
        self.store.with_session(session_id, |rec| {
            let author = operation.author_id.clone();
            let Some(participant) = rec.participants.get(&author) else {
                return Err(SessionError::UnauthorizedOperation {
                    session_id: session_id.to_string(),
                    user_id: author,
                });
            };
            if !participant.permission.has(PermissionLevel::Edit) {
                return Err(SessionError::InsufficientPermission {
                    session_id: session_id.to_string(),
                    user_id: author,
                    required: PermissionLevel::Edit,
                });
            }
            if !rec.session.status.accepts_edits() {
                return Err(SessionError::InvalidState {
                    session_id: session_id.to_string(),
                    action: "edit".to_string(),
                    current: rec.session.status.to_string(),
                });
            }

            let committed = rec.authority.commit(operation)?;

            rec.analytics.record_operation(&author);
            if let Some(participant) = rec.participants.get_mut(&author) {
                participant.touch(committed.committed_at);
            }

            self.events.append(
                session_id,
                EventKind::OperationCommitted,
                Some(&author),
                json!({
                    "version": committed.version,
                    "kind": committed.operation.kind,
                    "position": committed.operation.position,
                    "authoredVersion": committed.operation.authored_version,
                }),
            );
            debug!(
                session_id = %session_id,
                author_id = %author,
                version = committed.version,
                "Operation committed"
            );
            Ok(committed)
        })
    }

    /// Records that a participant applied everything up to `version`.
    pub fn acknowledge(&self, session_id: &str, user_id: &str, version: u64) -> Result<()> {
        let authority = self.store.with_session(session_id, |rec| {
            rec.participant(user_id)?;
            Ok(rec.authority.clone())
        })?;
        authority.acknowledge(user_id, version)?;
        Ok(())
    }

    pub fn authority(&self, session_id: &str) -> Result<Arc<SequencingAuthority>> {
        self.store
            .with_session(session_id, |rec| Ok(rec.authority.clone()))
    }

    pub fn document_snapshot(&self, session_id: &str) -> Result<DocumentSnapshot> {
        Ok(self.authority(session_id)?.snapshot())
    }

    /// Committed operations after `version`, for catch-up.
    pub fn operations_since(&self, session_id: &str, version: u64) -> Result<Vec<CommittedOperation>> {
        Ok(self.authority(session_id)?.operations_since(version))
    }

    /// Stream of operations committed from now on.
    pub fn subscribe_operations(&self, session_id: &str) -> Result<broadcast::Receiver<CommittedOperation>> {
        Ok(self.authority(session_id)?.subscribe())
    }

    // ==================== Chat ====================

    /// Sends a chat message.
    pub fn send_chat(&self, session_id: &str, user_id: &str, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::Validation("message cannot be empty".to_string()));
        }
        if text.chars().count() > MAX_CHAT_LENGTH {
            return Err(SessionError::Validation(format!(
                "message exceeds {} characters",
                MAX_CHAT_LENGTH
            )));
        }

        self.store.with_session(session_id, |rec| {
            if rec.session.status.is_over() {
                return Err(SessionError::SessionEnded {
                    session_id: session_id.to_string(),
                });
            }
            if !rec.session.settings.chat_enabled {
                return Err(SessionError::ChatDisabled {
                    session_id: session_id.to_string(),
                });
            }

            let participant = rec.participant_mut(user_id)?;
            let message = ChatMessage::new(session_id, user_id, participant.display_name.clone(), text);
            participant.touch(message.timestamp);
            rec.analytics.record_message(user_id);

            self.events.append(
                session_id,
                EventKind::ChatMessage,
                Some(user_id),
                json!({ "messageId": message.id, "text": message.text }),
            );
            Ok(message)
        })
    }

    // ==================== Queries ====================

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.store
            .with_session(session_id, |rec| Ok(rec.session.clone()))
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.store.list()
    }

    pub fn session_count(&self) -> usize {
        self.store.session_count()
    }

    /// Participants in join order.
    pub fn participants(&self, session_id: &str) -> Result<Vec<Participant>> {
        self.store
            .with_session(session_id, |rec| Ok(rec.ordered_participants()))
    }

    pub fn participant(&self, session_id: &str, user_id: &str) -> Result<Participant> {
        self.store
            .with_session(session_id, |rec| rec.participant(user_id).cloned())
    }

    pub fn analytics(&self, session_id: &str) -> Result<SessionAnalytics> {
        self.store
            .with_session(session_id, |rec| Ok(rec.analytics.clone()))
    }

    /// Shareable join link of a session.
    pub fn invite_link(&self, session_id: &str) -> Result<String> {
        let code = self
            .store
            .with_session(session_id, |rec| Ok(rec.session.invite_code.clone()))?;
        Ok(invite_link(&self.config.base_url, &code))
    }

    /// Finds the session an invite code belongs to. Case-insensitive.
    pub fn find_by_invite_code(&self, code: &str) -> Option<SessionId> {
        normalize_invite_code(code).and_then(|code| self.store.session_for_code(&code))
    }

    // ==================== Templates ====================

    pub fn create_template(&self, template: SessionTemplate, created_by: &str) -> Result<SessionTemplate> {
        self.templates.create(template, created_by)
    }

    pub fn rate_template(&self, template_id: &str, score: u8) -> Result<SessionTemplate> {
        self.templates.rate(template_id, score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ConnectionStatus;
    use crate::session::SessionStatus;
    use crate::ErrorCategory;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn manager() -> SessionManager {
        SessionManager::new(SessionManagerConfig::default(), Arc::new(EventLog::new()))
    }

    fn user(id: &str) -> UserIdentity {
        UserIdentity::new(id, id.to_uppercase())
    }

    fn create(m: &SessionManager, session_type: SessionType) -> Session {
        m.create_session(&user("alice"), "Session", session_type, &SettingsOverride::default())
            .unwrap()
    }

    fn public() -> SettingsOverride {
        SettingsOverride {
            is_public: Some(true),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct RecordingControl {
        closed: Mutex<Vec<String>>,
    }

    impl ConnectionControl for RecordingControl {
        fn close_participant(&self, session_id: &str, user_id: &str) {
            self.closed.lock().push(format!("{}/{}", session_id, user_id));
        }

        fn close_session(&self, session_id: &str) {
            self.closed.lock().push(format!("{}/*", session_id));
        }
    }

    #[test]
    fn test_create_session() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);

        assert_eq!(s.status, SessionStatus::Created);
        assert_eq!(s.owner_id, "alice");
        assert_eq!(s.invite_code.len(), 8);
        assert_eq!(m.find_by_invite_code(&s.invite_code.to_lowercase()), Some(s.id.clone()));

        let owner = m.participant(&s.id, "alice").unwrap();
        assert_eq!(owner.permission, PermissionLevel::Owner);
        assert!(m.analytics(&s.id).unwrap().joined_at.contains_key("alice"));

        let events = m.events().events(&s.id);
        assert_eq!(events[0].kind, EventKind::SessionCreated);
    }

    #[test]
    fn test_create_rejects_invalid_owner() {
        let m = manager();
        let result = m.create_session(
            &user(""),
            "Title",
            SessionType::Debugging,
            &SettingsOverride::default(),
        );
        assert!(matches!(result, Err(SessionError::Validation(_))));
    }

    #[test]
    fn test_join_with_code_promotes_to_waiting() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);

        let p = m
            .join_session(&s.id, &user("bob"), Some(&s.invite_code.to_lowercase()))
            .unwrap();
        assert_eq!(p.permission, PermissionLevel::Edit);
        assert_eq!(m.get_session(&s.id).unwrap().status, SessionStatus::Waiting);

        m.join_session(&s.id, &user("carol"), Some(&s.invite_code))
            .unwrap();
        let ids: Vec<_> = m
            .participants(&s.id)
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_join_admission_errors() {
        let m = manager();
        let s = create(&m, SessionType::PairProgramming);

        let err = m.join_session("missing", &user("bob"), None).unwrap_err();
        assert_eq!(err.kind(), "session_not_found");

        let err = m.join_session(&s.id, &user("bob"), Some("ZZZZZZZZ")).unwrap_err();
        assert_eq!(err.kind(), "invalid_invite_code");
        assert_eq!(err.category(), ErrorCategory::Admission);

        let err = m.join_session(&s.id, &user("alice"), Some(&s.invite_code)).unwrap_err();
        assert_eq!(err.kind(), "already_joined");

        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();
        let err = m.join_session(&s.id, &user("carol"), Some(&s.invite_code)).unwrap_err();
        assert!(matches!(err, SessionError::SessionFull { max: 2, .. }));

        m.end_session(&s.id, "alice").unwrap();
        let err = m.join_session(&s.id, &user("dave"), Some(&s.invite_code)).unwrap_err();
        assert_eq!(err.kind(), "session_ended");

        // Failed joins left no trace.
        assert_eq!(m.participants(&s.id).unwrap().len(), 2);
    }

    #[test]
    fn test_public_session_needs_no_code() {
        let m = manager();
        let s = m
            .create_session(&user("alice"), "Open", SessionType::StudyGroup, &public())
            .unwrap();
        assert!(m.join_session(&s.id, &user("bob"), None).is_ok());
    }

    #[test]
    fn test_approval_required() {
        let m = manager();
        let overrides = SettingsOverride {
            require_approval: Some(true),
            ..Default::default()
        };
        let s = m
            .create_session(&user("alice"), "Gated", SessionType::GroupProject, &overrides)
            .unwrap();

        let err = m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap_err();
        assert_eq!(err.kind(), "approval_required");

        m.approve_user(&s.id, "alice", "bob").unwrap();
        assert!(m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).is_ok());
    }

    #[test]
    fn test_owner_leaving_alone_ends_session() {
        let control = Arc::new(RecordingControl::default());
        let m = manager().with_connection_control(control.clone());
        let s = create(&m, SessionType::Debugging);

        m.leave_session(&s.id, "alice").unwrap();

        let ended = m.get_session(&s.id).unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert_eq!(
            *control.closed.lock(),
            vec![format!("{}/alice", s.id), format!("{}/*", s.id)]
        );

        let kinds: Vec<_> = m.events().events(&s.id).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::SessionCreated,
                EventKind::ParticipantLeft,
                EventKind::SessionEnded
            ]
        );
    }

    #[test]
    fn test_owner_leaving_transfers_ownership() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();
        m.join_session(&s.id, &user("carol"), Some(&s.invite_code)).unwrap();
        m.change_permission(&s.id, "alice", "carol", PermissionLevel::Admin)
            .unwrap();

        m.leave_session(&s.id, "alice").unwrap();

        let session = m.get_session(&s.id).unwrap();
        assert_eq!(session.owner_id, "carol");
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(
            m.participant(&s.id, "carol").unwrap().permission,
            PermissionLevel::Owner
        );
    }

    #[test]
    fn test_leave_not_a_participant() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        let err = m.leave_session(&s.id, "bob").unwrap_err();
        assert_eq!(err.kind(), "not_a_participant");
    }

    #[test]
    fn test_leave_removes_analytics_and_commit_rights() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();
        m.leave_session(&s.id, "bob").unwrap();

        assert!(!m.analytics(&s.id).unwrap().joined_at.contains_key("bob"));
        let err = m
            .submit_operation(&s.id, Operation::insert("bob", 0, 0, "x"))
            .unwrap_err();
        assert_eq!(err.kind(), "unauthorized_operation");
    }

    #[test]
    fn test_start_requires_owner_and_order() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();

        let err = m.start_session(&s.id, "bob").unwrap_err();
        assert_eq!(err.kind(), "not_owner");

        let started = m.start_session(&s.id, "alice").unwrap();
        assert_eq!(started.status, SessionStatus::Active);
        assert!(started.started_at.is_some());

        let err = m.start_session(&s.id, "alice").unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn test_pause_resume_end_archive() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();
        m.start_session(&s.id, "alice").unwrap();

        let err = m.pause_session(&s.id, "bob").unwrap_err();
        assert_eq!(err.kind(), "insufficient_permission");

        m.pause_session(&s.id, "alice").unwrap();
        m.resume_session(&s.id, "alice").unwrap();

        let ended = m.end_session(&s.id, "alice").unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        let analytics = m.analytics(&s.id).unwrap();
        assert_eq!(analytics.participants_at_end, Some(2));

        let err = m.end_session(&s.id, "alice").unwrap_err();
        assert_eq!(err.kind(), "invalid_state");

        let archived = m.archive_session(&s.id).unwrap();
        assert_eq!(archived.status, SessionStatus::Archived);
    }

    #[test]
    fn test_archive_releases_invite_code() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        let other = create(&m, SessionType::GroupProject);
        assert_eq!(m.find_by_invite_code(&s.invite_code), Some(s.id.clone()));

        m.start_session(&s.id, "alice").unwrap();
        m.end_session(&s.id, "alice").unwrap();
        // Ended sessions still answer to their code until archived.
        assert_eq!(m.find_by_invite_code(&s.invite_code), Some(s.id.clone()));

        m.archive_session(&s.id).unwrap();
        assert_eq!(m.find_by_invite_code(&s.invite_code), None);
        assert_eq!(m.find_by_invite_code(&other.invite_code), Some(other.id.clone()));

        // A freed code is available again, and only its session frees it.
        assert!(m.store.reserve_code(&s.invite_code, "next"));
        assert!(!m.store.release_code(&s.invite_code, &s.id));
        assert_eq!(m.find_by_invite_code(&s.invite_code), Some("next".to_string()));
    }

    #[test]
    fn test_admin_can_end() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();
        m.change_permission(&s.id, "alice", "bob", PermissionLevel::Admin)
            .unwrap();
        assert!(m.end_session(&s.id, "bob").is_ok());
    }

    #[test]
    fn test_update_settings_logs_delta() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();

        let changes = SettingsOverride {
            chat_enabled: Some(false),
            ..Default::default()
        };
        let err = m.update_settings(&s.id, "bob", &changes).unwrap_err();
        assert_eq!(err.kind(), "insufficient_permission");

        let settings = m.update_settings(&s.id, "alice", &changes).unwrap();
        assert!(!settings.chat_enabled);

        let updates = m.events().events_of_kind(&s.id, EventKind::SettingsUpdated);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].data["changes"]["chatEnabled"]["to"], false);

        // No-op update logs nothing.
        m.update_settings(&s.id, "alice", &changes).unwrap();
        assert_eq!(m.events().events_of_kind(&s.id, EventKind::SettingsUpdated).len(), 1);
    }

    #[test]
    fn test_change_permission_rules() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();
        m.join_session(&s.id, &user("carol"), Some(&s.invite_code)).unwrap();

        let p = m
            .change_permission(&s.id, "alice", "bob", PermissionLevel::ViewOnly)
            .unwrap();
        assert_eq!(p.permission, PermissionLevel::ViewOnly);

        // Owner's level is fixed.
        assert!(m
            .change_permission(&s.id, "alice", "alice", PermissionLevel::Edit)
            .is_err());
        // OWNER is never granted here.
        assert!(m
            .change_permission(&s.id, "alice", "bob", PermissionLevel::Owner)
            .is_err());
        // Editors cannot manage permissions.
        let err = m
            .change_permission(&s.id, "carol", "bob", PermissionLevel::Edit)
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_permission");

        let changes = m.events().events_of_kind(&s.id, EventKind::PermissionChanged);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].data["from"], "EDIT");
        assert_eq!(changes[0].data["to"], "VIEW_ONLY");
    }

    #[test]
    fn test_change_permission_reports_required_level() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        for id in ["bob", "carol", "dave"] {
            m.join_session(&s.id, &user(id), Some(&s.invite_code)).unwrap();
        }
        m.change_permission(&s.id, "alice", "bob", PermissionLevel::Admin)
            .unwrap();
        m.change_permission(&s.id, "alice", "carol", PermissionLevel::Admin)
            .unwrap();

        // An admin manages editors.
        let p = m
            .change_permission(&s.id, "bob", "dave", PermissionLevel::ViewOnly)
            .unwrap();
        assert_eq!(p.permission, PermissionLevel::ViewOnly);

        // Another admin is only reachable from above.
        match m.change_permission(&s.id, "bob", "carol", PermissionLevel::Edit) {
            Err(SessionError::InsufficientPermission { required, user_id, .. }) => {
                assert_eq!(required, PermissionLevel::Owner);
                assert_eq!(user_id, "bob");
            }
            other => panic!("expected insufficient permission, got {other:?}"),
        }

        // Editors fail the admin check before any target is looked at.
        m.change_permission(&s.id, "alice", "dave", PermissionLevel::Edit)
            .unwrap();
        match m.change_permission(&s.id, "dave", "bob", PermissionLevel::Edit) {
            Err(SessionError::InsufficientPermission { required, .. }) => {
                assert_eq!(required, PermissionLevel::Admin);
            }
            other => panic!("expected insufficient permission, got {other:?}"),
        }
    }

    #[test]
    fn test_transfer_ownership() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();

        let err = m.transfer_ownership(&s.id, "bob", "bob").unwrap_err();
        assert_eq!(err.kind(), "not_owner");

        m.transfer_ownership(&s.id, "alice", "bob").unwrap();
        assert_eq!(m.get_session(&s.id).unwrap().owner_id, "bob");
        assert_eq!(
            m.participant(&s.id, "alice").unwrap().permission,
            PermissionLevel::Admin
        );
        assert_eq!(
            m.participant(&s.id, "bob").unwrap().permission,
            PermissionLevel::Owner
        );
    }

    #[test]
    fn test_invitation_flow() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);

        let inv = m
            .create_invitation(&s.id, "alice", "bob", PermissionLevel::Admin)
            .unwrap();
        let p = m.accept_invitation(&inv.id, &user("bob")).unwrap();
        assert_eq!(p.permission, PermissionLevel::Admin);

        let err = m.accept_invitation(&inv.id, &user("bob")).unwrap_err();
        assert_eq!(err.kind(), "invitation_already_resolved");

        let resolved = m.get_invitation(&inv.id).unwrap();
        assert_eq!(resolved.status, InvitationStatus::Accepted);
        assert!(resolved.resolved_at.is_some());
    }

    #[test]
    fn test_expired_invitation_adds_nobody() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        let inv = m
            .create_invitation(&s.id, "alice", "bob", PermissionLevel::Edit)
            .unwrap();

        let err = m
            .accept_invitation_at(&inv.id, &user("bob"), inv.expires_at + 1)
            .unwrap_err();
        assert_eq!(err.kind(), "invitation_expired");
        assert_eq!(m.participants(&s.id).unwrap().len(), 1);
        assert!(m.get_invitation(&inv.id).unwrap().is_pending());

        assert_eq!(m.purge_expired_invitations(inv.expires_at + 1), 1);
        assert!(m.get_invitation(&inv.id).is_err());
    }

    #[test]
    fn test_invitation_rules() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();

        let err = m
            .create_invitation(&s.id, "bob", "carol", PermissionLevel::Edit)
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_permission");

        let err = m
            .create_invitation(&s.id, "alice", "carol", PermissionLevel::Owner)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let inv = m
            .create_invitation(&s.id, "alice", "carol", PermissionLevel::Edit)
            .unwrap();
        let err = m.accept_invitation(&inv.id, &user("mallory")).unwrap_err();
        assert_eq!(err.kind(), "invitation_mismatch");

        let declined = m.decline_invitation(&inv.id, "carol").unwrap();
        assert_eq!(declined.status, InvitationStatus::Declined);
        assert_eq!(m.invitations(&s.id).len(), 1);
    }

    #[test]
    fn test_submit_operation() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();

        let c1 = m
            .submit_operation(&s.id, Operation::insert("alice", 0, 0, "foo"))
            .unwrap();
        let c2 = m
            .submit_operation(&s.id, Operation::insert("bob", 0, 0, "bar"))
            .unwrap();
        assert_eq!(c1.version, 1);
        assert_eq!(c2.version, 2);
        assert_eq!(c2.operation.position, 3);
        assert_eq!(m.document_snapshot(&s.id).unwrap().content, "foobar");

        let commits = m.events().events_of_kind(&s.id, EventKind::OperationCommitted);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].data["version"], 2);
        assert_eq!(m.analytics(&s.id).unwrap().total_operations, 2);
    }

    #[test]
    fn test_submit_operation_rejections() {
        let m = manager();
        let s = create(&m, SessionType::LiveDemo);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();

        // Live demos admit viewers.
        let err = m
            .submit_operation(&s.id, Operation::insert("bob", 0, 0, "x"))
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_permission");

        let err = m
            .submit_operation(&s.id, Operation::insert("eve", 0, 0, "x"))
            .unwrap_err();
        assert_eq!(err.kind(), "unauthorized_operation");

        m.start_session(&s.id, "alice").unwrap();
        m.pause_session(&s.id, "alice").unwrap();
        let err = m
            .submit_operation(&s.id, Operation::insert("alice", 0, 0, "x"))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
        assert_eq!(m.document_snapshot(&s.id).unwrap().version, 0);
    }

    #[test]
    fn test_connection_status_events() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();

        m.set_connection_status(&s.id, "bob", ConnectionStatus::Reconnecting)
            .unwrap();
        m.set_connection_status(&s.id, "bob", ConnectionStatus::Disconnected)
            .unwrap();
        m.set_connection_status(&s.id, "bob", ConnectionStatus::Disconnected)
            .unwrap();
        m.set_connection_status(&s.id, "bob", ConnectionStatus::Connected)
            .unwrap();

        let events = m.events().events(&s.id);
        let kinds: Vec<_> = events
            .iter()
            .filter(|e| e.category() == duet_realtime::EventCategory::Connection)
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::ConnectionLost, EventKind::ConnectionRestored]
        );

        // Session survives the lost connection.
        assert_eq!(m.get_session(&s.id).unwrap().status, SessionStatus::Waiting);
    }

    #[test]
    fn test_consent_snapshot() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        m.join_session(&s.id, &user("bob"), Some(&s.invite_code)).unwrap();
        m.join_session(&s.id, &user("carol"), Some(&s.invite_code)).unwrap();
        m.set_recording_consent(&s.id, "bob", true).unwrap();

        let snapshot = m.consent_snapshot(&s.id).unwrap();
        assert!(snapshot.consent_required);
        assert_eq!(snapshot.participants["alice"], true);
        assert_eq!(snapshot.participants["bob"], true);
        assert_eq!(snapshot.missing(), vec!["carol"]);
    }

    #[test]
    fn test_chat() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);

        let msg = m.send_chat(&s.id, "alice", "  hello ").unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.display_name, "ALICE");

        assert!(m.send_chat(&s.id, "alice", "   ").is_err());
        assert_eq!(
            m.send_chat(&s.id, "zed", "hi").unwrap_err().kind(),
            "not_a_participant"
        );

        let changes = SettingsOverride {
            chat_enabled: Some(false),
            ..Default::default()
        };
        m.update_settings(&s.id, "alice", &changes).unwrap();
        assert_eq!(
            m.send_chat(&s.id, "alice", "hi").unwrap_err().kind(),
            "chat_disabled"
        );
    }

    #[test]
    fn test_cursor_update() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        let cursor = CursorPosition { line: 3, column: 7 };
        m.update_cursor(&s.id, "alice", Some(cursor), None).unwrap();
        assert_eq!(m.participant(&s.id, "alice").unwrap().cursor, Some(cursor));
    }

    #[test]
    fn test_template_instantiation() {
        let m = manager();
        let template = m.templates().find_by_name("Mock Interview").unwrap();

        let s = m
            .create_session_from_template(
                &user("alice"),
                &template.id,
                None,
                &SettingsOverride::default(),
            )
            .unwrap();
        assert_eq!(s.title, "Mock Interview");
        assert_eq!(s.session_type, SessionType::InterviewPractice);
        assert_eq!(s.language.as_deref(), Some("python"));
        assert_eq!(s.template_id.as_deref(), Some(template.id.as_str()));
        assert_eq!(m.templates().get(&template.id).unwrap().usage_count, 1);

        let rated = m.rate_template(&template.id, 4).unwrap();
        assert_eq!(rated.rating, 4.0);
    }

    #[test]
    fn test_invite_link() {
        let m = manager();
        let s = create(&m, SessionType::GroupProject);
        assert_eq!(
            m.invite_link(&s.id).unwrap(),
            format!("http://localhost:3000/collaborate/join/{}", s.invite_code)
        );
    }

    #[derive(Debug, Clone)]
    enum Action {
        Join(usize),
        Leave(usize),
        Transfer(usize),
        Promote(usize),
    }

    fn action_strategy() -> impl Strategy<Value = Action> {
        prop_oneof![
            (0..10usize).prop_map(Action::Join),
            (0..10usize).prop_map(Action::Leave),
            (0..10usize).prop_map(Action::Transfer),
            (0..10usize).prop_map(Action::Promote),
        ]
    }

    proptest! {
        /// Property: the participant cap and the single owner hold after any
        /// sequence of joins, leaves and ownership changes.
        #[test]
        fn prop_cap_and_single_owner(
            type_index in 0..SessionType::ALL.len(),
            actions in prop::collection::vec(action_strategy(), 1..40),
        ) {
            let m = manager();
            let session_type = SessionType::ALL[type_index];
            let s = m.create_session(&user("u0"), "Prop", session_type, &public()).unwrap();
            let name = |i: usize| format!("u{}", i);

            for action in actions {
                let owner = m.get_session(&s.id).unwrap().owner_id;
                let _ = match action {
                    Action::Join(i) => m.join_session(&s.id, &user(&name(i)), None).map(|_| ()),
                    Action::Leave(i) => m.leave_session(&s.id, &name(i)),
                    Action::Transfer(i) => m.transfer_ownership(&s.id, &owner, &name(i)),
                    Action::Promote(i) => m
                        .change_permission(&s.id, &owner, &name(i), PermissionLevel::Admin)
                        .map(|_| ()),
                };

                let session = m.get_session(&s.id).unwrap();
                let participants = m.participants(&s.id).unwrap();
                prop_assert!(participants.len() <= session_type.max_participants());

                if participants.is_empty() {
                    prop_assert_eq!(session.status, SessionStatus::Ended);
                } else {
                    let owners: Vec<_> = participants.iter().filter(|p| p.is_owner()).collect();
                    prop_assert_eq!(owners.len(), 1);
                    prop_assert_eq!(&owners[0].user_id, &session.owner_id);
                }
            }
        }
    }
}
