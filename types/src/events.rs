//! Events pushed out of the streamer core.

use crate::stats::StreamStats;
use crate::SessionId;
use serde::{Deserialize, Serialize};

/// Which rule produced a committed bitrate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitrateDecision {
    /// Heavy loss or very high RTT
    AggressiveCut,
    /// Moderate loss or elevated RTT
    ConservativeCut,
    /// Clean network, headroom below the ceiling
    Raise,
    /// Policy held, but the sender bandwidth estimate forced the value down
    BandwidthCeiling,
}

impl std::fmt::Display for BitrateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AggressiveCut => write!(f, "aggressive cut"),
            Self::ConservativeCut => write!(f, "conservative cut"),
            Self::Raise => write!(f, "raise"),
            Self::BandwidthCeiling => write!(f, "bandwidth ceiling"),
        }
    }
}

/// Event types delivered to subscribers of a streamer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StreamerEvent {
    /// Streaming started or stopped
    StateChanged {
        session_id: Option<SessionId>,
        running: bool,
        message: String,
    },
    /// Pipeline creation/start failed, or the engine reported an error
    Error {
        session_id: Option<SessionId>,
        message: String,
    },
    /// A stats snapshot (final snapshot on stop)
    StatsUpdated {
        session_id: SessionId,
        stats: StreamStats,
    },
    /// The encoder bitrate was changed by the adaptive controller
    BitrateChanged {
        session_id: SessionId,
        from_kbps: u32,
        to_kbps: u32,
        decision: BitrateDecision,
    },
}

impl StreamerEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            StreamerEvent::StateChanged {
                running, message, ..
            } => {
                if *running {
                    format!("Streaming started: {}", message)
                } else {
                    format!("Streaming stopped: {}", message)
                }
            }
            StreamerEvent::Error { message, .. } => format!("Streamer error: {}", message),
            StreamerEvent::StatsUpdated { session_id, stats } => format!(
                "Stats for session {}: {:.0} bps, {} bytes, {}",
                session_id, stats.current_bitrate, stats.bytes_sent, stats.connection_state
            ),
            StreamerEvent::BitrateChanged {
                from_kbps,
                to_kbps,
                decision,
                ..
            } => format!(
                "Encoder bitrate {} -> {} kbps ({})",
                from_kbps, to_kbps, decision
            ),
        }
    }

    /// Whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, StreamerEvent::Error { .. })
    }
}
