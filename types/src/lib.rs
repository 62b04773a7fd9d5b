//! Shared types for the uplink streamer.
//!
//! This crate contains the configuration, statistics, lifecycle and event
//! types shared between the streamer core and whatever front end drives it.

/// Unique identifier for one streaming session (one `start()` .. `stop()`).
pub type SessionId = uuid::Uuid;

pub mod config;
pub mod events;
pub mod state;
pub mod stats;

// Re-export commonly used types
pub use config::{AudioConfig, EncoderPreset, RelayConfig, StreamConfig, TransportMode, VideoConfig};
pub use events::{BitrateDecision, StreamerEvent};
pub use state::LifecycleState;
pub use stats::{ConnectionState, IngestStats, ReliableTransportStats, StreamStats, STATS_EXPORT_LEN};
