//! Session capability flags and limits.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::permission::PermissionLevel;
use crate::session::SessionType;
use crate::{Result, SessionError};

/// Allowed shape of a file type entry, e.g. `rs` or `.py`.
static FILE_TYPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.?[a-z0-9]{1,10}$").expect("Invalid regex"));

/// Settings of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub recording_enabled: bool,
    /// Whether recording needs every participant's consent.
    pub recording_consent_required: bool,
    pub chat_enabled: bool,
    pub voice_enabled: bool,
    pub video_enabled: bool,
    pub screen_share_enabled: bool,
    pub whiteboard_enabled: bool,
    pub file_share_enabled: bool,
    #[validate(range(min = 5, max = 3600))]
    pub autosave_interval_secs: u32,
    #[validate(range(min = 1, max = 500))]
    pub max_file_size_mb: u32,
    #[validate(length(max = 32))]
    pub allowed_file_types: Vec<String>,
    /// Joining needs prior approval by the owner or an admin.
    pub require_approval: bool,
    pub mute_on_join: bool,
    /// Public sessions accept joins without the invite code.
    pub is_public: bool,
    /// Permission granted to users joining with the invite code.
    pub default_permission: PermissionLevel,
    #[validate(range(min = 1, max = 480))]
    pub inactivity_timeout_mins: u32,
    pub breakout_rooms_enabled: bool,
    #[validate(range(max = 20))]
    pub max_breakout_rooms: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            recording_enabled: true,
            recording_consent_required: true,
            chat_enabled: true,
            voice_enabled: true,
            video_enabled: true,
            screen_share_enabled: true,
            whiteboard_enabled: false,
            file_share_enabled: true,
            autosave_interval_secs: 30,
            max_file_size_mb: 10,
            allowed_file_types: ["js", "ts", "py", "rs", "java", "cpp", "go", "md", "txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            require_approval: false,
            mute_on_join: false,
            is_public: false,
            default_permission: PermissionLevel::Edit,
            inactivity_timeout_mins: 30,
            breakout_rooms_enabled: false,
            max_breakout_rooms: 0,
        }
    }
}

impl SessionSettings {
    /// Default settings for a session type.
    pub fn for_type(session_type: SessionType) -> Self {
        let mut settings = Self::default();
        match session_type {
            SessionType::LiveDemo => {
                settings.default_permission = PermissionLevel::ViewOnly;
                settings.mute_on_join = true;
            }
            SessionType::CodeReview => {
                settings.default_permission = PermissionLevel::ViewOnly;
            }
            SessionType::InterviewPractice => {
                settings.chat_enabled = false;
            }
            SessionType::HackathonTeam | SessionType::GroupProject => {
                settings.whiteboard_enabled = true;
                settings.breakout_rooms_enabled = true;
                settings.max_breakout_rooms = 4;
            }
            SessionType::StudyGroup => {
                settings.whiteboard_enabled = true;
            }
            SessionType::PairProgramming | SessionType::Debugging => {}
        }
        settings
    }

    /// Checks ranges and cross-field rules.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        if self.default_permission == PermissionLevel::Owner {
            return Err(SessionError::Validation(
                "default permission cannot be OWNER".to_string(),
            ));
        }

        if let Some(bad) = self
            .allowed_file_types
            .iter()
            .find(|t| !FILE_TYPE_REGEX.is_match(t))
        {
            return Err(SessionError::Validation(format!(
                "invalid file type: {}",
                bad
            )));
        }

        if !self.breakout_rooms_enabled && self.max_breakout_rooms > 0 {
            return Err(SessionError::Validation(
                "breakout room limit set while breakout rooms are disabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns a copy with the override applied, and the changed fields.
    ///
    /// The delta maps each changed field (camelCase) to `{from, to}`.
    pub fn merged(&self, changes: &SettingsOverride) -> Result<(Self, Map<String, Value>)> {
        let mut next = self.clone();
        let mut delta = Map::new();

        macro_rules! merge {
            ($($field:ident => $name:literal),* $(,)?) => {
                $(
                    if let Some(value) = &changes.$field {
                        if next.$field != *value {
                            delta.insert(
                                $name.to_string(),
                                serde_json::json!({ "from": next.$field, "to": value }),
                            );
                            next.$field = value.clone();
                        }
                    }
                )*
            };
        }

        merge! {
            recording_enabled => "recordingEnabled",
            recording_consent_required => "recordingConsentRequired",
            chat_enabled => "chatEnabled",
            voice_enabled => "voiceEnabled",
            video_enabled => "videoEnabled",
            screen_share_enabled => "screenShareEnabled",
            whiteboard_enabled => "whiteboardEnabled",
            file_share_enabled => "fileShareEnabled",
            autosave_interval_secs => "autosaveIntervalSecs",
            max_file_size_mb => "maxFileSizeMb",
            allowed_file_types => "allowedFileTypes",
            require_approval => "requireApproval",
            mute_on_join => "muteOnJoin",
            is_public => "isPublic",
            default_permission => "defaultPermission",
            inactivity_timeout_mins => "inactivityTimeoutMins",
            breakout_rooms_enabled => "breakoutRoomsEnabled",
            max_breakout_rooms => "maxBreakoutRooms",
        }

        next.check()?;
        Ok((next, delta))
    }
}

/// Partial settings; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsOverride {
    pub recording_enabled: Option<bool>,
    pub recording_consent_required: Option<bool>,
    pub chat_enabled: Option<bool>,
    pub voice_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
    pub screen_share_enabled: Option<bool>,
    pub whiteboard_enabled: Option<bool>,
    pub file_share_enabled: Option<bool>,
    pub autosave_interval_secs: Option<u32>,
    pub max_file_size_mb: Option<u32>,
    pub allowed_file_types: Option<Vec<String>>,
    pub require_approval: Option<bool>,
    pub mute_on_join: Option<bool>,
    pub is_public: Option<bool>,
    pub default_permission: Option<PermissionLevel>,
    pub inactivity_timeout_mins: Option<u32>,
    pub breakout_rooms_enabled: Option<bool>,
    pub max_breakout_rooms: Option<u32>,
}

impl SettingsOverride {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
