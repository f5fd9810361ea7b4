//! Local capture tracks and the capture capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Kind of a capture track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Screen,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Screen => "screen",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A captured track. Disabling it mutes the track without touching any
/// connection carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTrack {
    pub id: String,
    pub kind: MediaKind,
    pub enabled: bool,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
        }
    }
}

/// Platform capture capability.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquires a capture track of `kind`.
    async fn acquire(&self, kind: MediaKind) -> Result<MediaTrack>;

    /// Stops a previously acquired track.
    fn release(&self, track: &MediaTrack);
}

/// Tracks currently captured by the local participant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMedia {
    pub audio: Option<MediaTrack>,
    pub camera: Option<MediaTrack>,
    pub screen: Option<MediaTrack>,
}

impl LocalMedia {
    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.camera.as_ref(),
            MediaKind::Screen => self.screen.as_ref(),
        }
    }

    pub fn track_mut(&mut self, kind: MediaKind) -> &mut Option<MediaTrack> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.camera,
            MediaKind::Screen => &mut self.screen,
        }
    }

    /// The track sent as outgoing video: the screen while sharing, else
    /// the camera.
    pub fn outgoing_video(&self) -> Option<&MediaTrack> {
        self.screen.as_ref().or(self.camera.as_ref())
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.screen.is_some()
    }
}
