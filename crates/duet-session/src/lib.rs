//! # Duet Session
//!
//! Session lifecycle, admission and permissions for collaborative coding
//! sessions.
//!
//! A [`SessionManager`] owns every session. Each session keeps its
//! participants, settings, analytics and a sequencing authority for the
//! shared document behind one lock, and every accepted mutation is appended
//! to the shared [`duet_realtime::EventLog`].
//!
//! ## Lifecycle
//!
//! ```text
//! CREATED -> WAITING -> ACTIVE <-> PAUSED
//!     \          \         \        /
//!      +----------+---------+-> ENDED -> ARCHIVED
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use duet_realtime::EventLog;
//! use duet_session::{SessionManager, SessionManagerConfig, SessionType, SettingsOverride};
//! use duet_types::UserIdentity;
//!
//! let manager = SessionManager::new(SessionManagerConfig::default(), Arc::new(EventLog::new()));
//! let alice = UserIdentity::new("alice", "Alice");
//! let bob = UserIdentity::new("bob", "Bob");
//!
//! let session = manager
//!     .create_session(&alice, "Pairing", SessionType::PairProgramming, &SettingsOverride::default())
//!     .unwrap();
//! manager.join_session(&session.id, &bob, Some(session.invite_code.as_str())).unwrap();
//! manager.start_session(&session.id, "alice").unwrap();
//!
//! assert_eq!(manager.participants(&session.id).unwrap().len(), 2);
//! ```

pub mod analytics;
pub mod error;
pub mod invitation;
pub mod invite_code;
pub mod manager;
pub mod participant;
pub mod permission;
pub mod session;
pub mod settings;
pub mod store;
pub mod template;

pub use analytics::SessionAnalytics;
pub use error::{ErrorCategory, SessionError};
pub use invitation::{Invitation, InvitationStatus};
pub use invite_code::{generate_invite_code, invite_link, normalize_invite_code, INVITE_CODE_LENGTH};
pub use manager::{ConnectionControl, SessionManager, SessionManagerConfig, MAX_CHAT_LENGTH};
pub use participant::{
    ConnectionStatus, ConsentSnapshot, CursorPosition, Participant, SelectionRange,
};
pub use permission::PermissionLevel;
pub use session::{Session, SessionStatus, SessionType};
pub use settings::{SessionSettings, SettingsOverride};
pub use store::{SessionRecord, SessionStore};
pub use template::{Difficulty, SessionTemplate, TemplateRegistry};

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
