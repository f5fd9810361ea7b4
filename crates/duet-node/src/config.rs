//! Node configuration.
//!
//! Values come from built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `DUET` using `__` as the section
//! separator (`DUET__PEER__CONNECT_TIMEOUT_MS=5000`).

use duet_peer::{OrchestratorConfig, QualityThresholds, ReconnectPolicy};
use duet_recording::RecorderConfig;
use duet_session::SessionManagerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::error::NodeError;
use crate::observability::LogFormat;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for a Duet node.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NodeConfig {
    /// Base of invite links.
    #[validate(length(min = 1))]
    pub base_url: String,
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
    #[validate(nested)]
    pub session: SessionSection,
    #[validate(nested)]
    pub peer: PeerSection,
    #[validate(nested)]
    pub recording: RecordingSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            session: SessionSection::default(),
            peer: PeerSection::default(),
            recording: RecordingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionSection {
    #[validate(range(min = 60))]
    pub invitation_ttl_secs: u64,
    /// Autosave interval applied when a new session does not set one.
    #[validate(range(min = 5, max = 3600))]
    pub default_autosave_secs: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            invitation_ttl_secs: 7 * 24 * 60 * 60,
            default_autosave_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PeerSection {
    #[validate(range(min = 1))]
    pub signaling_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub send_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub quality_sample_interval_ms: u64,
    pub poor_quality_grace_ms: u64,
    #[validate(range(min = 1))]
    pub reconnect_initial_delay_ms: u64,
    #[validate(range(min = 1))]
    pub reconnect_max_delay_ms: u64,
    #[validate(range(min = 1, max = 20))]
    pub reconnect_max_attempts: u32,
    pub quality: QualityThresholds,
}

impl Default for PeerSection {
    fn default() -> Self {
        Self {
            signaling_timeout_ms: 10_000,
            connect_timeout_ms: 15_000,
            send_timeout_ms: 5_000,
            quality_sample_interval_ms: 2_000,
            poor_quality_grace_ms: 5_000,
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 8_000,
            reconnect_max_attempts: 4,
            quality: QualityThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RecordingSection {
    #[validate(range(min = 100))]
    pub chunk_duration_ms: u64,
    /// Point in the recording the thumbnail is taken from.
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub thumbnail_fraction: f64,
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 1_000,
            thumbnail_fraction: 0.1,
        }
    }
}

impl NodeConfig {
    /// Loads defaults, the optional file, then `DUET__*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, NodeError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DUET")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: NodeConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| NodeError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Checks field ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), NodeError> {
        Validate::validate(self).map_err(|e| NodeError::Config(e.to_string()))?;

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(NodeError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(NodeError::Config(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        if !matches!(self.log_format.to_lowercase().as_str(), "pretty" | "json") {
            return Err(NodeError::Config(format!(
                "log_format must be pretty or json, got {:?}",
                self.log_format
            )));
        }
        if self.peer.reconnect_max_delay_ms < self.peer.reconnect_initial_delay_ms {
            return Err(NodeError::Config(
                "peer.reconnect_max_delay_ms is below reconnect_initial_delay_ms".to_string(),
            ));
        }
        if !self.peer.quality.is_consistent() {
            return Err(NodeError::Config(
                "peer.quality thresholds must increase from excellent to fair".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format)
    }

    pub fn session_manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            invitation_ttl: Duration::from_secs(self.session.invitation_ttl_secs),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let peer = &self.peer;
        OrchestratorConfig {
            signaling_timeout: Duration::from_millis(peer.signaling_timeout_ms),
            connect_timeout: Duration::from_millis(peer.connect_timeout_ms),
            send_timeout: Duration::from_millis(peer.send_timeout_ms),
            sample_interval: Duration::from_millis(peer.quality_sample_interval_ms),
            poor_quality_grace: Duration::from_millis(peer.poor_quality_grace_ms),
            reconnect: ReconnectPolicy::new(
                peer.reconnect_max_attempts,
                Duration::from_millis(peer.reconnect_initial_delay_ms),
                Duration::from_millis(peer.reconnect_max_delay_ms),
            ),
            thresholds: peer.quality.clone(),
        }
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            chunk_duration: Duration::from_millis(self.recording.chunk_duration_ms),
            thumbnail_fraction: self.recording.thumbnail_fraction,
        }
    }
}
