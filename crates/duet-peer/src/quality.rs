//! Connection quality classification and the poor-quality grace window.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One sample of connection statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Round-trip time in milliseconds.
    pub rtt_ms: u32,
    /// Fraction of packets lost, 0.0 to 1.0.
    pub packet_loss: f64,
    /// Outgoing bitrate in kbps.
    pub bitrate_kbps: u32,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self {
            rtt_ms: 40,
            packet_loss: 0.0,
            bitrate_kbps: 1_500,
        }
    }
}

/// Four-tier quality scale, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "EXCELLENT",
            QualityTier::Good => "GOOD",
            QualityTier::Fair => "FAIR",
            QualityTier::Poor => "POOR",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upper bounds of each tier. A sample must satisfy both the latency and
/// the loss bound of a tier to land in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub excellent_rtt_ms: u32,
    pub excellent_loss: f64,
    pub good_rtt_ms: u32,
    pub good_loss: f64,
    pub fair_rtt_ms: u32,
    pub fair_loss: f64,
    /// Below this bitrate the tier is at best FAIR.
    pub min_bitrate_kbps: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_rtt_ms: 100,
            excellent_loss: 0.01,
            good_rtt_ms: 200,
            good_loss: 0.03,
            fair_rtt_ms: 400,
            fair_loss: 0.08,
            min_bitrate_kbps: 100,
        }
    }
}

impl QualityThresholds {
    pub fn classify(&self, stats: &ConnectionStats) -> QualityTier {
        let tier = if stats.rtt_ms < self.excellent_rtt_ms && stats.packet_loss < self.excellent_loss
        {
            QualityTier::Excellent
        } else if stats.rtt_ms < self.good_rtt_ms && stats.packet_loss < self.good_loss {
            QualityTier::Good
        } else if stats.rtt_ms < self.fair_rtt_ms && stats.packet_loss < self.fair_loss {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        };

        if stats.bitrate_kbps < self.min_bitrate_kbps {
            tier.max(QualityTier::Fair)
        } else {
            tier
        }
    }

    /// Checks that the bounds grow from tier to tier.
    pub fn is_consistent(&self) -> bool {
        self.excellent_rtt_ms <= self.good_rtt_ms
            && self.good_rtt_ms <= self.fair_rtt_ms
            && self.excellent_loss <= self.good_loss
            && self.good_loss <= self.fair_loss
            && (0.0..=1.0).contains(&self.fair_loss)
    }
}

/// What the monitor wants done after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    /// Nothing to do.
    Steady,
    /// The tier changed from the previous sample.
    Changed { from: Option<QualityTier>, to: QualityTier },
    /// Quality stayed POOR past the grace window.
    Renegotiate,
}

/// Tracks how long a connection has been POOR.
#[derive(Debug, Clone)]
pub struct QualityMonitor {
    grace: Duration,
    current: Option<QualityTier>,
    poor_since: Option<Instant>,
}

impl QualityMonitor {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            current: None,
            poor_since: None,
        }
    }

    pub fn current(&self) -> Option<QualityTier> {
        self.current
    }

    /// Records a classified sample taken at `now`.
    ///
    /// Renegotiation is requested once per POOR stretch; the stretch restarts
    /// after [`QualityMonitor::reset`] or any better sample.
    pub fn observe(&mut self, tier: QualityTier, now: Instant) -> QualityVerdict {
        let previous = self.current.replace(tier);

        if tier != QualityTier::Poor {
            self.poor_since = None;
        } else if let Some(since) = self.poor_since {
            if now.duration_since(since) >= self.grace {
                self.poor_since = None;
                return QualityVerdict::Renegotiate;
            }
        } else {
            self.poor_since = Some(now);
        }

        if previous != Some(tier) {
            QualityVerdict::Changed {
                from: previous,
                to: tier,
            }
        } else {
            QualityVerdict::Steady
        }
    }

    /// Forgets the current POOR stretch.
    pub fn reset(&mut self) {
        self.poor_since = None;
    }
}
