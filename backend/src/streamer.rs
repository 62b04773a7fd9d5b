//! Pipeline lifecycle.
//!
//! A [`Streamer`] owns one engine pipeline at a time and moves it through
//! UNINITIALIZED → PIPELINE_CREATED → STREAMING → STOPPED. Telemetry and
//! bitrate adaptation only run while streaming; both live behind a single
//! session mutex so a refresh and the decision it feeds are never split.
//! Buffer pushes touch only atomics and a read lock on the handle.

use crate::abr::{AbrSettings, AbrStatus, BitrateController};
use crate::engine::{
    AudioSamples, EngineContext, EngineError, EngineState, MediaEngine, PipelineHandle, VideoFrame,
};
use crate::events::EventBroadcaster;
use crate::telemetry::{TelemetryAggregator, TelemetryInput};
use crate::time::{InstantTimeSrc, TimeSource};
use garde::Validate;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use uplink_types::{
    IngestStats, LifecycleState, SessionId, StreamConfig, StreamStats, StreamerEvent,
};

/// Errors returned by lifecycle operations.
#[derive(Error, Debug)]
pub enum StreamerError {
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation not allowed in state {0}")]
    InvalidState(LifecycleState),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

struct Lifecycle {
    state: LifecycleState,
    config: Option<StreamConfig>,
}

/// Telemetry and ABR state for the current pipeline.
struct Session {
    id: Option<SessionId>,
    aggregator: TelemetryAggregator,
    controller: BitrateController,
}

#[derive(Default)]
struct IngestCounters {
    video_frames: AtomicU64,
    audio_buffers: AtomicU64,
    rejected_buffers: AtomicU64,
}

impl IngestCounters {
    fn reset(&self) {
        self.video_frames.store(0, Ordering::Relaxed);
        self.audio_buffers.store(0, Ordering::Relaxed);
        self.rejected_buffers.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> IngestStats {
        IngestStats {
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_buffers: self.audio_buffers.load(Ordering::Relaxed),
            rejected_buffers: self.rejected_buffers.load(Ordering::Relaxed),
        }
    }
}

/// Drives one uplink pipeline.
pub struct Streamer<E: MediaEngine> {
    engine: E,
    events: EventBroadcaster,
    time: Arc<dyn TimeSource>,
    abr_settings: AbrSettings,
    lifecycle: Mutex<Lifecycle>,
    handle: RwLock<Option<Arc<E::Handle>>>,
    session: Mutex<Option<Session>>,
    /// Shared with the engine's error reporter
    session_id: Arc<RwLock<Option<SessionId>>>,
    streaming: AtomicBool,
    /// Muxed output bytes counted by the engine probe
    fallback_bytes: Arc<AtomicU64>,
    ingest: IngestCounters,
}

impl<E: MediaEngine> Streamer<E> {
    pub fn new(engine: E, events: EventBroadcaster, abr_settings: AbrSettings) -> Self {
        Self::with_time_source(engine, events, abr_settings, Arc::new(InstantTimeSrc::new()))
    }

    pub fn with_time_source(
        engine: E,
        events: EventBroadcaster,
        abr_settings: AbrSettings,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            engine,
            events,
            time,
            abr_settings,
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Uninitialized,
                config: None,
            }),
            handle: RwLock::new(None),
            session: Mutex::new(None),
            session_id: Arc::new(RwLock::new(None)),
            streaming: AtomicBool::new(false),
            fallback_bytes: Arc::new(AtomicU64::new(0)),
            ingest: IngestCounters::default(),
        }
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.lock().state
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Configuration of the current pipeline, if one exists.
    pub fn config(&self) -> Option<StreamConfig> {
        self.lifecycle.lock().config.clone()
    }

    /// Id of the current (or last) streaming session.
    pub fn session_id(&self) -> Option<SessionId> {
        *self.session_id.read()
    }

    fn engine_context(&self) -> EngineContext {
        let fallback_bytes = self.fallback_bytes.clone();
        let events = self.events.clone();
        let session_id = self.session_id.clone();

        EngineContext {
            output_probe: Arc::new(move |size| {
                fallback_bytes.fetch_add(size, Ordering::Relaxed);
            }),
            on_error: Arc::new(move |message| {
                events.broadcast(StreamerEvent::Error {
                    session_id: *session_id.read(),
                    message,
                });
            }),
        }
    }

    /// Build a pipeline for `config`, replacing any existing one.
    pub fn create_pipeline(&self, config: StreamConfig) -> Result<(), StreamerError> {
        let mut lifecycle = self.lifecycle.lock();

        if lifecycle.state == LifecycleState::Streaming {
            warn!("Refusing to create a pipeline while streaming");
            return Err(StreamerError::InvalidState(lifecycle.state));
        }

        if let Err(report) = config.validate() {
            let message = report.to_string();
            warn!("Rejected stream configuration: {}", message);
            return Err(StreamerError::InvalidConfig(message));
        }

        if lifecycle.state.has_pipeline() {
            info!("Destroying previous pipeline before creating a new one");
            self.release_pipeline(&mut lifecycle);
        }

        match self.engine.build_graph(&config, self.engine_context()) {
            Ok(handle) => {
                let now = self.time.now();
                *self.session.lock() = Some(Session {
                    id: None,
                    aggregator: TelemetryAggregator::new(&config, now),
                    controller: BitrateController::new(
                        config.video.bitrate_kbps(),
                        self.abr_settings.clone(),
                        now,
                    ),
                });
                *self.handle.write() = Some(Arc::new(handle));
                lifecycle.state = LifecycleState::PipelineCreated;
                lifecycle.config = Some(config);
                info!("Pipeline created");
                Ok(())
            }
            Err(e) => {
                error!("Failed to create pipeline: {}", e);
                self.events.broadcast(StreamerEvent::Error {
                    session_id: None,
                    message: format!("Failed to create pipeline: {}", e),
                });
                Err(e.into())
            }
        }
    }

    /// Start streaming with fresh counters.
    pub fn start(&self) -> Result<SessionId, StreamerError> {
        let mut lifecycle = self.lifecycle.lock();

        if !matches!(
            lifecycle.state,
            LifecycleState::PipelineCreated | LifecycleState::Stopped
        ) {
            warn!("Cannot start in state {}", lifecycle.state);
            return Err(StreamerError::InvalidState(lifecycle.state));
        }

        let (Some(handle), Some(config)) = (self.handle.read().clone(), lifecycle.config.clone())
        else {
            return Err(StreamerError::InvalidState(lifecycle.state));
        };

        let now = self.time.now();
        let session_id = SessionId::new_v4();
        let mut aggregator = TelemetryAggregator::new(&config, now);
        aggregator.begin_session(now);
        let session = Session {
            id: Some(session_id),
            aggregator,
            controller: BitrateController::new(
                config.video.bitrate_kbps(),
                self.abr_settings.clone(),
                now,
            ),
        };

        // The probe may fire as soon as the pipeline starts rolling
        self.fallback_bytes.store(0, Ordering::SeqCst);
        self.ingest.reset();

        if let Err(e) = handle.set_state(EngineState::Playing) {
            error!("Failed to start pipeline: {}", e);
            self.events.broadcast(StreamerEvent::Error {
                session_id: None,
                message: format!(
                    "Failed to start streaming to {}:{} (connection likely refused): {}",
                    config.host, config.port, e
                ),
            });
            return Err(e.into());
        }

        *self.session.lock() = Some(session);
        *self.session_id.write() = Some(session_id);
        self.streaming.store(true, Ordering::SeqCst);
        lifecycle.state = LifecycleState::Streaming;

        info!(
            "Streaming started: session {} ({} to {}:{})",
            session_id, config.transport, config.host, config.port
        );
        self.events.broadcast(StreamerEvent::StateChanged {
            session_id: Some(session_id),
            running: true,
            message: format!(
                "Streaming via {} to {}:{}",
                config.transport, config.host, config.port
            ),
        });

        Ok(session_id)
    }

    /// Stop streaming. A no-op unless streaming.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != LifecycleState::Streaming {
            debug!("Stop ignored in state {}", lifecycle.state);
            return;
        }

        // Final sample without a bitrate decision
        if let Some(handle) = self.handle.read().clone() {
            if let Some(session) = self.session.lock().as_mut() {
                self.sample(session, handle.as_ref());
            }
        }
        self.streaming.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.read().clone() {
            if let Err(e) = handle.set_state(EngineState::Null) {
                warn!("Error while stopping pipeline: {}", e);
            }
        }

        let (session_id, stats) = {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(session) => {
                    session.aggregator.end_session();
                    (session.id, session.aggregator.snapshot())
                }
                None => (None, StreamStats::default()),
            }
        };

        lifecycle.state = LifecycleState::Stopped;

        info!(
            "Streaming stopped: {} bytes in {} ms, lost={}, retransmitted={}, dropped={}",
            stats.bytes_sent,
            stats.stream_duration_ms,
            stats.packets_lost,
            stats.packets_retransmitted,
            stats.packets_dropped
        );

        if let Some(session_id) = session_id {
            self.events.broadcast(StreamerEvent::StatsUpdated {
                session_id,
                stats,
            });
        }
        self.events.broadcast(StreamerEvent::StateChanged {
            session_id,
            running: false,
            message: "Streaming stopped".to_string(),
        });
    }

    /// Tear everything down and return to UNINITIALIZED.
    pub fn destroy(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == LifecycleState::Uninitialized {
            return;
        }
        self.release_pipeline(&mut lifecycle);
        info!("Streamer destroyed");
    }

    fn release_pipeline(&self, lifecycle: &mut Lifecycle) {
        self.streaming.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.write().take() {
            if lifecycle.state == LifecycleState::Streaming {
                if let Err(e) = handle.set_state(EngineState::Null) {
                    warn!("Error while stopping pipeline: {}", e);
                }
            }
            // Dropping the last reference tears the pipeline down
            drop(handle);
        }
        *self.session.lock() = None;
        lifecycle.state = LifecycleState::Uninitialized;
        lifecycle.config = None;
    }

    /// Feed one NV21 camera frame. Dropped unless streaming.
    pub fn push_video_frame(&self, data: &[u8], width: u32, height: u32, timestamp_ns: i64) {
        if !self.is_streaming() {
            trace!("Dropping video frame: not streaming");
            return;
        }
        let Some(handle) = self.handle.read().clone() else {
            return;
        };

        let frame = VideoFrame {
            data,
            width,
            height,
            timestamp_ns,
        };
        match handle.push_video(frame) {
            Ok(()) => {
                self.ingest.video_frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.ingest.rejected_buffers.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to push video frame: {}", e);
            }
        }
    }

    /// Feed one block of interleaved S16LE samples. Dropped unless streaming.
    pub fn push_audio_samples(
        &self,
        data: &[u8],
        sample_rate: u32,
        channels: u32,
        timestamp_ns: i64,
    ) {
        if !self.is_streaming() {
            trace!("Dropping audio samples: not streaming");
            return;
        }
        let Some(handle) = self.handle.read().clone() else {
            return;
        };

        let samples = AudioSamples {
            data,
            sample_rate,
            channels,
            timestamp_ns,
        };
        match handle.push_audio(samples) {
            Ok(()) => {
                self.ingest.audio_buffers.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.ingest.rejected_buffers.fetch_add(1, Ordering::Relaxed);
                debug!("Failed to push audio samples: {}", e);
            }
        }
    }

    /// Pull fresh telemetry, let the controller react, and return the snapshot.
    ///
    /// Outside a streaming session this only returns the last snapshot.
    pub fn refresh(&self) -> StreamStats {
        let handle = self.handle.read().clone();
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return StreamStats::default();
        };

        let handle = match handle {
            Some(handle) if self.is_streaming() && session.aggregator.is_active() => handle,
            _ => return session.aggregator.snapshot(),
        };

        let (stats, now) = self.sample(session, handle.as_ref());

        if let Some(adjustment) = session.controller.evaluate(&stats, now, handle.as_ref()) {
            if let Some(session_id) = session.id {
                self.events.broadcast(StreamerEvent::BitrateChanged {
                    session_id,
                    from_kbps: adjustment.from_kbps,
                    to_kbps: adjustment.to_kbps,
                    decision: adjustment.decision,
                });
            }
        }

        stats
    }

    fn sample(&self, session: &mut Session, handle: &E::Handle) -> (StreamStats, Instant) {
        let now = self.time.now();
        let reliable = handle.reliable_stats();
        let input = TelemetryInput {
            reliable: reliable.as_ref(),
            fallback_bytes: self.fallback_bytes.load(Ordering::Relaxed),
            engine_broken: handle.is_broken(),
        };
        (session.aggregator.refresh(now, input).clone(), now)
    }

    /// The last computed snapshot, without pulling telemetry.
    pub fn snapshot(&self) -> StreamStats {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.aggregator.snapshot())
            .unwrap_or_default()
    }

    /// Refresh, then return the snapshot.
    pub fn get_stats(&self) -> StreamStats {
        self.refresh()
    }

    /// Bitrate controller state of the current pipeline.
    pub fn abr_status(&self) -> Option<AbrStatus> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.controller.status())
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.ingest.snapshot()
    }
}

impl<E: MediaEngine> Drop for Streamer<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}
