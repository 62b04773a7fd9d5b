//! Statistics types for a running uplink session.
//!
//! [`StreamStats`] is the merged view handed to callers. [`ReliableTransportStats`]
//! is the normalized telemetry an engine adapter reports for a reliable
//! transport sink; every field is optional because sinks only start filling
//! them in once the connection is up.

use serde::{Deserialize, Serialize};

/// Connection state of the outgoing transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Broken,
}

impl ConnectionState {
    /// Stable ordinal used in the numeric snapshot export.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Broken => 3,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Broken => write!(f, "BROKEN"),
        }
    }
}

/// Number of entries in [`StreamStats::to_export_vector`].
pub const STATS_EXPORT_LEN: usize = 9;

/// Snapshot of the outgoing stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StreamStats {
    /// Windowed send rate in bits per second
    pub current_bitrate: f64,
    /// Total bytes sent this session (never decreases)
    pub bytes_sent: u64,
    /// Packets reported lost by the transport (reliable transport only)
    pub packets_lost: u64,
    /// Packets retransmitted (reliable transport only)
    pub packets_retransmitted: u64,
    /// Packets dropped by the sender (reliable transport only)
    pub packets_dropped: u64,
    /// Round-trip time in milliseconds
    pub rtt_ms: f64,
    /// Sender-side bandwidth estimate in bits per second, if the transport has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_estimate_bps: Option<u64>,
    /// Time since the session started
    pub stream_duration_ms: u64,
    pub connection_state: ConnectionState,
}

impl StreamStats {
    /// Flatten into the ordered numeric vector used across process boundaries:
    /// `[current_bitrate, bytes_sent, packets_lost, rtt_ms, stream_duration_ms,
    /// packets_retransmitted, packets_dropped, bandwidth_estimate_bps,
    /// connection_state_ordinal]`.
    ///
    /// An unknown bandwidth estimate is exported as 0.
    pub fn to_export_vector(&self) -> [f64; STATS_EXPORT_LEN] {
        [
            self.current_bitrate,
            self.bytes_sent as f64,
            self.packets_lost as f64,
            self.rtt_ms,
            self.stream_duration_ms as f64,
            self.packets_retransmitted as f64,
            self.packets_dropped as f64,
            self.bandwidth_estimate_bps.unwrap_or(0) as f64,
            f64::from(self.connection_state.ordinal()),
        ]
    }
}

/// Normalized sender statistics from a reliable-transport sink.
///
/// Absent fields mean "not known yet", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReliableTransportStats {
    pub bytes_sent_total: Option<u64>,
    pub packets_sent: Option<u64>,
    pub packets_lost: Option<u64>,
    pub packets_retransmitted: Option<u64>,
    pub packets_dropped: Option<u64>,
    pub rtt_ms: Option<f64>,
    pub bandwidth_estimate_bps: Option<u64>,
    /// The sink's own send-rate figure in bits per second
    pub send_rate_bps: Option<f64>,
}

impl ReliableTransportStats {
    /// The sink has started counting payload bytes.
    pub fn is_reporting(&self) -> bool {
        self.bytes_sent_total.is_some_and(|b| b > 0)
    }
}

/// Counters for buffers handed to the engine by the capture side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IngestStats {
    pub video_frames: u64,
    pub audio_buffers: u64,
    /// Buffers the engine's ingestion queue refused
    pub rejected_buffers: u64,
}
