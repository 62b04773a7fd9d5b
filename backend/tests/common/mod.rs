//! Scripted engine for driving `Streamer` without GStreamer.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uplink::engine::{
    AudioSamples, EncoderControl, EngineContext, EngineError, EngineState, MediaEngine,
    OutputProbe, PipelineHandle, VideoFrame,
};
use uplink::{AbrSettings, EventBroadcaster, ManualTimeSource, Streamer};
use uplink_types::{ReliableTransportStats, StreamConfig, StreamerEvent, TransportMode};

/// Knobs and recordings shared between a test and the engine it handed out.
#[derive(Default)]
pub struct MockControl {
    pub fail_build: AtomicBool,
    pub fail_start: AtomicBool,
    pub reject_buffers: AtomicBool,
    pub broken: AtomicBool,
    pub reliable: Mutex<Option<ReliableTransportStats>>,
    pub states: Mutex<Vec<EngineState>>,
    pub bitrates: Mutex<Vec<u32>>,
    pub builds: AtomicUsize,
    pub live_handles: AtomicUsize,
    pub last_context: Mutex<Option<EngineContext>>,
}

impl MockControl {
    pub fn set_reliable(&self, stats: Option<ReliableTransportStats>) {
        *self.reliable.lock() = stats;
    }

    pub fn states(&self) -> Vec<EngineState> {
        self.states.lock().clone()
    }

    pub fn bitrates(&self) -> Vec<u32> {
        self.bitrates.lock().clone()
    }

    /// Report an asynchronous engine error, as a bus thread would.
    pub fn report_error(&self, message: &str) {
        self.broken.store(true, Ordering::SeqCst);
        if let Some(ctx) = self.last_context.lock().as_ref() {
            (ctx.on_error)(message.to_string());
        }
    }
}

pub struct MockEngine {
    pub control: Arc<MockControl>,
}

impl MediaEngine for MockEngine {
    type Handle = MockHandle;

    fn build_graph(
        &self,
        _config: &StreamConfig,
        ctx: EngineContext,
    ) -> Result<Self::Handle, EngineError> {
        if self.control.fail_build.load(Ordering::SeqCst) {
            return Err(EngineError::Build("no such element \"x264enc\"".to_string()));
        }
        self.control.builds.fetch_add(1, Ordering::SeqCst);
        self.control.live_handles.fetch_add(1, Ordering::SeqCst);
        *self.control.last_context.lock() = Some(ctx.clone());

        Ok(MockHandle {
            control: self.control.clone(),
            probe: ctx.output_probe,
        })
    }
}

/// Counts every pushed buffer as muxed output of the same size.
pub struct MockHandle {
    control: Arc<MockControl>,
    probe: OutputProbe,
}

impl MockHandle {
    fn push(&self, data: &[u8]) -> Result<(), EngineError> {
        if self.control.reject_buffers.load(Ordering::SeqCst) {
            return Err(EngineError::BufferRejected("flushing".to_string()));
        }
        (self.probe)(data.len() as u64);
        Ok(())
    }
}

impl EncoderControl for MockHandle {
    fn set_encoder_bitrate_kbps(&self, kbps: u32) -> Result<(), EngineError> {
        self.control.bitrates.lock().push(kbps);
        Ok(())
    }
}

impl PipelineHandle for MockHandle {
    fn set_state(&self, state: EngineState) -> Result<(), EngineError> {
        if state == EngineState::Playing && self.control.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::StateChange("Connection refused".to_string()));
        }
        if state == EngineState::Playing {
            self.control.broken.store(false, Ordering::SeqCst);
        }
        self.control.states.lock().push(state);
        Ok(())
    }

    fn reliable_stats(&self) -> Option<ReliableTransportStats> {
        self.control.reliable.lock().clone()
    }

    fn is_broken(&self) -> bool {
        self.control.broken.load(Ordering::SeqCst)
    }

    fn push_video(&self, frame: VideoFrame<'_>) -> Result<(), EngineError> {
        self.push(frame.data)
    }

    fn push_audio(&self, samples: AudioSamples<'_>) -> Result<(), EngineError> {
        self.push(samples.data)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.control.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub streamer: Streamer<MockEngine>,
    pub control: Arc<MockControl>,
    pub clock: ManualTimeSource,
    pub start: Instant,
    pub events: EventBroadcaster,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(AbrSettings::default())
    }

    pub fn with_settings(settings: AbrSettings) -> Self {
        let control = Arc::new(MockControl::default());
        let start = Instant::now();
        let clock = ManualTimeSource::new(start);
        let events = EventBroadcaster::new(256);
        let streamer = Streamer::with_time_source(
            MockEngine {
                control: control.clone(),
            },
            events.clone(),
            settings,
            Arc::new(clock.clone()),
        );

        Self {
            streamer,
            control,
            clock,
            start,
            events,
        }
    }
}

pub fn config(transport: TransportMode) -> StreamConfig {
    StreamConfig::new(transport, "127.0.0.1", 9000)
}

/// Everything currently queued on `rx`.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<StreamerEvent>) -> Vec<StreamerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
