//! Per-session stream configuration.
//!
//! A [`StreamConfig`] is built once before the pipeline is created and is
//! never mutated while a session is running.

use serde::{Deserialize, Serialize};

/// Default target port for both SRT and UDP output.
pub const DEFAULT_TARGET_PORT: u16 = 9000;

/// Default SRT receiver latency in milliseconds.
pub const DEFAULT_SRT_LATENCY_MS: u32 = 500;

/// Transport used for the muxed MPEG-TS output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// SRT, with its own retransmission and sender-side statistics.
    Srt,
    /// Plain UDP with no feedback channel. Reliability, if any, is provided
    /// by a bonding relay in front of the network.
    #[default]
    Udp,
}

impl TransportMode {
    /// Whether the transport reports protocol-level statistics.
    pub fn is_reliable(&self) -> bool {
        matches!(self, Self::Srt)
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Srt => write!(f, "SRT"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// Encoder speed/quality preset (x264 `speed-preset` names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    #[default]
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl EncoderPreset {
    /// The value accepted by the encoder's `speed-preset` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

/// Video capture and encoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
#[serde(default)]
pub struct VideoConfig {
    #[cfg_attr(feature = "validation", garde(range(min = 16, max = 7680)))]
    pub width: u32,
    #[cfg_attr(feature = "validation", garde(range(min = 16, max = 4320)))]
    pub height: u32,
    /// Target (and maximum) video bitrate in bits per second
    #[cfg_attr(feature = "validation", garde(range(min = 1000)))]
    pub bitrate: u32,
    #[cfg_attr(feature = "validation", garde(range(min = 1, max = 240)))]
    pub frame_rate: u32,
    #[cfg_attr(feature = "validation", garde(skip))]
    pub preset: EncoderPreset,
    /// Keyframe every N seconds
    #[cfg_attr(feature = "validation", garde(range(min = 1, max = 60)))]
    pub keyframe_interval_secs: u32,
    #[cfg_attr(feature = "validation", garde(range(max = 16)))]
    pub b_frames: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            bitrate: 4_000_000,
            frame_rate: 30,
            preset: EncoderPreset::Ultrafast,
            keyframe_interval_secs: 2,
            b_frames: 0,
        }
    }
}

impl VideoConfig {
    /// Video bitrate in kbps, the unit the encoder works in.
    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate / 1000
    }

    /// GOP length in frames.
    pub fn gop_size(&self) -> u32 {
        self.frame_rate.saturating_mul(self.keyframe_interval_secs)
    }
}

/// Audio capture and encoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
#[serde(default)]
pub struct AudioConfig {
    /// AAC bitrate in bits per second
    #[cfg_attr(feature = "validation", garde(range(min = 8000)))]
    pub bitrate: u32,
    #[cfg_attr(feature = "validation", garde(range(min = 8000, max = 192_000)))]
    pub sample_rate: u32,
    #[cfg_attr(feature = "validation", garde(range(min = 1, max = 8)))]
    pub channels: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bitrate: 128_000,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Relay/proxy the output is routed through (e.g. a local bonding tunnel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
pub struct RelayConfig {
    #[cfg_attr(feature = "validation", garde(length(min = 1)))]
    pub host: String,
    #[cfg_attr(feature = "validation", garde(range(min = 1)))]
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 28007,
        }
    }
}

/// Complete configuration for one streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
#[serde(default)]
pub struct StreamConfig {
    #[cfg_attr(feature = "validation", garde(skip))]
    pub transport: TransportMode,
    /// Target host (SRT peer or UDP destination)
    #[cfg_attr(feature = "validation", garde(length(min = 1)))]
    pub host: String,
    #[cfg_attr(feature = "validation", garde(range(min = 1)))]
    pub port: u16,
    /// SRT stream id, ignored for UDP
    #[cfg_attr(feature = "validation", garde(skip))]
    pub stream_id: Option<String>,
    /// SRT passphrase, ignored for UDP
    #[cfg_attr(feature = "validation", garde(skip))]
    pub passphrase: Option<String>,
    #[cfg_attr(feature = "validation", garde(range(max = 10_000)))]
    pub srt_latency_ms: u32,
    #[cfg_attr(feature = "validation", garde(dive))]
    pub video: VideoConfig,
    #[cfg_attr(feature = "validation", garde(dive))]
    pub audio: AudioConfig,
    #[cfg_attr(feature = "validation", garde(dive))]
    pub relay: Option<RelayConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            host: String::new(),
            port: DEFAULT_TARGET_PORT,
            stream_id: None,
            passphrase: None,
            srt_latency_ms: DEFAULT_SRT_LATENCY_MS,
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            relay: None,
        }
    }
}

impl StreamConfig {
    /// Create a configuration for the given target with default media settings.
    pub fn new(transport: TransportMode, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Combined configured audio + video rate, used before any rate was measured.
    pub fn nominal_bitrate_bps(&self) -> f64 {
        f64::from(self.video.bitrate) + f64::from(self.audio.bitrate)
    }

    /// `srt://host:port[?streamid=...]`
    pub fn srt_uri(&self) -> String {
        let mut uri = format!("srt://{}:{}", self.host, self.port);
        if let Some(stream_id) = self.stream_id.as_deref().filter(|s| !s.is_empty()) {
            uri.push_str("?streamid=");
            uri.push_str(stream_id);
        }
        uri
    }
}
