//! Boundary to the media-pipeline engine.
//!
//! The streamer core never touches pipeline elements directly. It builds a
//! graph through [`MediaEngine`], drives it through [`PipelineHandle`], and
//! reads normalized telemetry back. The GStreamer implementation lives in
//! [`crate::gst`]; tests plug in a scripted engine.

use std::sync::Arc;
use thiserror::Error;
use uplink_types::{ReliableTransportStats, StreamConfig};

/// Target state for the engine pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Running: encoders and transport active
    Playing,
    /// Torn down to its initial state
    Null,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to build pipeline: {0}")]
    Build(String),

    #[error("Pipeline state change failed: {0}")]
    StateChange(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Buffer rejected: {0}")]
    BufferRejected(String),

    #[error("Failed to set encoder bitrate: {0}")]
    Bitrate(String),
}

/// Callback invoked by an engine thread once per encoded output buffer,
/// receiving the buffer size in bytes.
pub type OutputProbe = Arc<dyn Fn(u64) + Send + Sync>;

/// Callback invoked from an engine thread when the pipeline reports a fatal
/// error while running.
pub type ErrorReporter = Arc<dyn Fn(String) + Send + Sync>;

/// What the core hands to the engine when building a graph.
#[derive(Clone)]
pub struct EngineContext {
    /// Byte-count probe for the encoded output
    pub output_probe: OutputProbe,
    /// Where asynchronous pipeline errors go
    pub on_error: ErrorReporter,
}

/// One raw video frame from the camera (NV21).
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub timestamp_ns: i64,
}

/// A block of interleaved S16LE samples from the microphone.
#[derive(Debug, Clone, Copy)]
pub struct AudioSamples<'a> {
    pub data: &'a [u8],
    pub sample_rate: u32,
    pub channels: u32,
    pub timestamp_ns: i64,
}

/// Sets the live encoder target bitrate.
pub trait EncoderControl {
    fn set_encoder_bitrate_kbps(&self, kbps: u32) -> Result<(), EngineError>;
}

/// A built pipeline. Dropping the handle destroys it.
pub trait PipelineHandle: EncoderControl + Send + Sync + 'static {
    fn set_state(&self, state: EngineState) -> Result<(), EngineError>;

    /// Normalized sender statistics of the reliable-transport sink, or `None`
    /// when the pipeline has no such sink or it is not reporting yet.
    fn reliable_stats(&self) -> Option<ReliableTransportStats>;

    /// The engine reported a fatal error since the last transition to playing.
    fn is_broken(&self) -> bool;

    fn push_video(&self, frame: VideoFrame<'_>) -> Result<(), EngineError>;

    fn push_audio(&self, samples: AudioSamples<'_>) -> Result<(), EngineError>;
}

/// Builds pipelines from a stream configuration.
pub trait MediaEngine: Send + Sync {
    type Handle: PipelineHandle;

    fn build_graph(
        &self,
        config: &StreamConfig,
        ctx: EngineContext,
    ) -> Result<Self::Handle, EngineError>;
}
