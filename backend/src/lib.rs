//! Uplink library.
//!
//! Drives a live audio/video uplink: builds an encode/mux/transport pipeline,
//! feeds it camera and microphone buffers, aggregates transport telemetry,
//! and adapts the encoder bitrate to the network.

use tracing::info;

pub mod abr;
pub mod config;
pub mod engine;
pub mod events;
pub mod gst;
pub mod streamer;
pub mod telemetry;
pub mod time;

pub use abr::{AbrSettings, AbrStatus, BitrateAdjustment, BitrateController};
pub use engine::{EngineError, MediaEngine, PipelineHandle};
pub use events::EventBroadcaster;
pub use gst::{GstEngine, GstPipelineHandle};
pub use streamer::{Streamer, StreamerError};
pub use telemetry::TelemetryAggregator;
pub use time::{InstantTimeSrc, ManualTimeSource, TimeSource};

/// Initialize GStreamer. Call once before building a [`GstEngine`] pipeline.
pub fn initialize() -> Result<(), gstreamer::glib::Error> {
    gstreamer::init()?;
    info!("GStreamer initialized ({})", gstreamer::version_string());
    Ok(())
}
