//! GStreamer implementation of [`MediaEngine`].

use super::bus::BusMonitor;
use super::launch::{
    build_launch_description, select_aac_encoder, AUDIO_SRC, MUXER, TRANSPORT_SINK, VIDEO_ENCODER,
    VIDEO_SRC,
};
use super::srt_stats::normalize_srt_stats;
use crate::engine::{
    AudioSamples, EncoderControl, EngineContext, EngineError, EngineState, ErrorReporter,
    MediaEngine, PipelineHandle, VideoFrame,
};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uplink_types::{ReliableTransportStats, StreamConfig, TransportMode};

/// Builds MPEG-TS uplink pipelines with `gst::parse::launch`.
#[derive(Debug, Clone, Default)]
pub struct GstEngine;

impl GstEngine {
    pub fn new() -> Self {
        Self
    }
}

impl MediaEngine for GstEngine {
    type Handle = GstPipelineHandle;

    fn build_graph(
        &self,
        config: &StreamConfig,
        ctx: EngineContext,
    ) -> Result<Self::Handle, EngineError> {
        let aac_encoder = select_aac_encoder()
            .ok_or_else(|| EngineError::ElementNotFound("no AAC encoder available".to_string()))?;

        if let Some(relay) = &config.relay {
            info!(
                "Traffic expected to traverse local relay at {}:{}",
                relay.host, relay.port
            );
        }

        let description = build_launch_description(config, aac_encoder);
        info!(
            "Creating {} pipeline to {}:{} ({}x{} @ {} fps, {} kbps)",
            config.transport,
            config.host,
            config.port,
            config.video.width,
            config.video.height,
            config.video.frame_rate,
            config.video.bitrate_kbps()
        );
        debug!("Pipeline description: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| EngineError::Build(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| EngineError::Build("parsed graph is not a pipeline".to_string()))?;

        let video_src = app_src(&pipeline, VIDEO_SRC)?;
        let audio_src = app_src(&pipeline, AUDIO_SRC)?;
        let encoder = element(&pipeline, VIDEO_ENCODER)?;
        let sink = element(&pipeline, TRANSPORT_SINK)?;
        let mux = element(&pipeline, MUXER)?;

        for src in [&video_src, &audio_src] {
            src.set_stream_type(gst_app::AppStreamType::Stream);
            src.set_format(gst::Format::Time);
        }

        let mux_src = mux
            .static_pad("src")
            .ok_or_else(|| EngineError::ElementNotFound(format!("{}:src", MUXER)))?;
        let probe = ctx.output_probe.clone();
        mux_src.add_probe(
            gst::PadProbeType::BUFFER | gst::PadProbeType::BUFFER_LIST,
            move |_pad, info| {
                match info.data {
                    Some(gst::PadProbeData::Buffer(ref buffer)) => probe(buffer.size() as u64),
                    Some(gst::PadProbeData::BufferList(ref list)) => {
                        probe(list.calculate_size() as u64)
                    }
                    _ => {}
                }
                gst::PadProbeReturn::Ok
            },
        );

        info!("Pipeline created");

        Ok(GstPipelineHandle {
            pipeline,
            video_src,
            audio_src,
            encoder,
            sink,
            transport: config.transport,
            frame_rate: config.video.frame_rate.max(1),
            video_caps: Mutex::new(None),
            broken: Arc::new(AtomicBool::new(false)),
            bus_monitor: Mutex::new(None),
            on_error: ctx.on_error,
        })
    }
}

fn element(pipeline: &gst::Pipeline, name: &str) -> Result<gst::Element, EngineError> {
    pipeline
        .by_name(name)
        .ok_or_else(|| EngineError::ElementNotFound(name.to_string()))
}

fn app_src(pipeline: &gst::Pipeline, name: &str) -> Result<gst_app::AppSrc, EngineError> {
    element(pipeline, name)?
        .downcast::<gst_app::AppSrc>()
        .map_err(|_| EngineError::ElementNotFound(format!("{} is not an appsrc", name)))
}

/// Caps fields are signed; reject frames whose geometry does not fit.
fn caps_dimensions(width: u32, height: u32, fps: u32) -> Result<(i32, i32, i32), EngineError> {
    let field = |name: &str, value: u32| {
        i32::try_from(value).map_err(|_| {
            EngineError::BufferRejected(format!("{} {} does not fit video caps", name, value))
        })
    };
    Ok((field("width", width)?, field("height", height)?, field("framerate", fps)?))
}

/// A parsed pipeline together with the elements the streamer drives.
pub struct GstPipelineHandle {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: gst_app::AppSrc,
    encoder: gst::Element,
    sink: gst::Element,
    transport: TransportMode,
    frame_rate: u32,
    /// Resolution the video source caps were last set for
    video_caps: Mutex<Option<(u32, u32)>>,
    broken: Arc<AtomicBool>,
    bus_monitor: Mutex<Option<BusMonitor>>,
    on_error: ErrorReporter,
}

impl GstPipelineHandle {
    fn update_video_caps(&self, width: u32, height: u32) -> Result<(), EngineError> {
        let mut current = self.video_caps.lock();
        if *current == Some((width, height)) {
            return Ok(());
        }

        let (caps_width, caps_height, fps) = caps_dimensions(width, height, self.frame_rate)?;
        info!(
            "Setting video caps: {}x{} @ {} fps",
            width, height, self.frame_rate
        );
        let caps = gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Nv21)
            .width(caps_width)
            .height(caps_height)
            .framerate(gst::Fraction::new(fps, 1))
            .build();
        self.video_src.set_caps(Some(&caps));
        *current = Some((width, height));
        Ok(())
    }

    fn push(src: &gst_app::AppSrc, data: &[u8], duration_ns: u64) -> Result<(), EngineError> {
        let mut buffer = gst::Buffer::from_slice(data.to_vec());
        {
            // Timestamps come from the pipeline clock (do-timestamp=true).
            let buffer = buffer.make_mut();
            buffer.set_duration(gst::ClockTime::from_nseconds(duration_ns));
        }
        src.push_buffer(buffer)
            .map(|_| ())
            .map_err(|flow| EngineError::BufferRejected(format!("{:?}", flow)))
    }
}

impl EncoderControl for GstPipelineHandle {
    fn set_encoder_bitrate_kbps(&self, kbps: u32) -> Result<(), EngineError> {
        if self.encoder.find_property("bitrate").is_none() {
            return Err(EngineError::Bitrate(
                "encoder has no bitrate property".to_string(),
            ));
        }
        self.encoder.set_property("bitrate", kbps);
        debug!("Encoder bitrate set to {} kbps", kbps);
        Ok(())
    }
}

impl PipelineHandle for GstPipelineHandle {
    fn set_state(&self, state: EngineState) -> Result<(), EngineError> {
        match state {
            EngineState::Playing => {
                self.broken.store(false, Ordering::SeqCst);
                *self.video_caps.lock() = None;

                let mut bus_monitor = self.bus_monitor.lock();
                if let Some(mut previous) = bus_monitor.take() {
                    previous.stop();
                }
                *bus_monitor =
                    BusMonitor::spawn(&self.pipeline, self.broken.clone(), self.on_error.clone());
                drop(bus_monitor);

                match self.pipeline.set_state(gst::State::Playing) {
                    Ok(change) => {
                        info!("Pipeline set to Playing ({:?})", change);
                        Ok(())
                    }
                    Err(e) => {
                        error!("Failed to set pipeline to Playing: {}", e);
                        let _ = self.pipeline.set_state(gst::State::Null);
                        if let Some(mut monitor) = self.bus_monitor.lock().take() {
                            monitor.stop();
                        }
                        Err(EngineError::StateChange(format!(
                            "pipeline refused Playing: {}",
                            e
                        )))
                    }
                }
            }
            EngineState::Null => {
                let result = self.pipeline.set_state(gst::State::Null);
                if let Some(mut monitor) = self.bus_monitor.lock().take() {
                    monitor.stop();
                }
                match result {
                    Ok(_) => {
                        info!("Pipeline set to Null");
                        Ok(())
                    }
                    Err(e) => {
                        warn!("Failed to set pipeline to Null: {}", e);
                        Err(EngineError::StateChange(e.to_string()))
                    }
                }
            }
        }
    }

    fn reliable_stats(&self) -> Option<ReliableTransportStats> {
        if self.transport != TransportMode::Srt || self.sink.find_property("stats").is_none() {
            return None;
        }
        let stats = self.sink.property::<gst::Structure>("stats");
        Some(normalize_srt_stats(&stats))
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn push_video(&self, frame: VideoFrame<'_>) -> Result<(), EngineError> {
        self.update_video_caps(frame.width, frame.height)?;
        let duration_ns = 1_000_000_000 / u64::from(self.frame_rate);
        Self::push(&self.video_src, frame.data, duration_ns)
    }

    fn push_audio(&self, samples: AudioSamples<'_>) -> Result<(), EngineError> {
        let bytes_per_frame = 2 * u64::from(samples.channels.max(1));
        let sample_count = samples.data.len() as u64 / bytes_per_frame;
        let duration_ns = sample_count * 1_000_000_000 / u64::from(samples.sample_rate.max(1));
        Self::push(&self.audio_src, samples.data, duration_ns)
    }
}

impl Drop for GstPipelineHandle {
    fn drop(&mut self) {
        debug!("Destroying pipeline");
        let _ = self.pipeline.set_state(gst::State::Null);
        if let Some(mut monitor) = self.bus_monitor.lock().take() {
            monitor.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_dimensions_in_range() {
        assert_eq!(caps_dimensions(1280, 720, 30).unwrap(), (1280, 720, 30));
    }

    #[test]
    fn test_caps_dimensions_overflow_rejects_frame() {
        let err = caps_dimensions(u32::MAX, 720, 30).unwrap_err();
        assert!(matches!(err, EngineError::BufferRejected(ref m) if m.contains("width")));

        assert!(matches!(
            caps_dimensions(1280, 720, i32::MAX as u32 + 1),
            Err(EngineError::BufferRejected(_))
        ));
    }
}
