//! Bus monitoring for a running pipeline.
//!
//! The streamer is embedded without a GLib main loop, so messages are popped
//! from a dedicated thread instead of through a signal watch.

use crate::engine::ErrorReporter;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const POLL_INTERVAL_MS: u64 = 100;

/// A thread draining the pipeline bus. Stopped and joined on drop.
pub struct BusMonitor {
    quit: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BusMonitor {
    /// Start monitoring `pipeline`. Errors set `broken` and are reported
    /// through `on_error`.
    pub fn spawn(
        pipeline: &gst::Pipeline,
        broken: Arc<AtomicBool>,
        on_error: ErrorReporter,
    ) -> Option<Self> {
        let Some(bus) = pipeline.bus() else {
            warn!("Pipeline has no bus, errors will not be reported");
            return None;
        };

        let quit = Arc::new(AtomicBool::new(false));
        let quit_flag = quit.clone();
        let pipeline_weak = pipeline.downgrade();

        let thread = std::thread::Builder::new()
            .name("uplink-bus".to_string())
            .spawn(move || {
                while !quit_flag.load(Ordering::SeqCst) {
                    let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(POLL_INTERVAL_MS))
                    else {
                        continue;
                    };
                    handle_message(&msg, &pipeline_weak, &broken, &on_error);
                }
                debug!("Bus monitor exiting");
            });

        match thread {
            Ok(handle) => Some(Self {
                quit,
                thread: Some(handle),
            }),
            Err(e) => {
                error!("Failed to spawn bus monitor thread: {}", e);
                None
            }
        }
    }

    /// Signal the thread to exit and wait for it.
    pub fn stop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Bus monitor thread panicked");
            }
        }
    }
}

impl Drop for BusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_message(
    msg: &gst::Message,
    pipeline: &gst::glib::WeakRef<gst::Pipeline>,
    broken: &AtomicBool,
    on_error: &ErrorReporter,
) {
    use gst::MessageView;

    trace!("Bus message type: {:?}", msg.type_());

    match msg.view() {
        MessageView::Error(err) => {
            let error_msg = err.error().to_string();
            let source = err.src().map(|s| s.name().to_string());

            error!(
                "Pipeline error: {} (debug: {:?}, source: {:?})",
                error_msg,
                err.debug(),
                source
            );

            broken.store(true, Ordering::SeqCst);
            let message = match source {
                Some(source) => format!("{}: {}", source, error_msg),
                None => error_msg,
            };
            on_error(message);
        }
        MessageView::Warning(w) => {
            warn!(
                "Pipeline warning: {} (debug: {:?}, source: {:?})",
                w.error(),
                w.debug(),
                w.src().map(|s| s.name().to_string())
            );
        }
        MessageView::Eos(_) => {
            info!("Pipeline reached end of stream");
        }
        MessageView::StateChanged(state_changed) => {
            let from_pipeline = match (msg.src(), pipeline.upgrade()) {
                (Some(src), Some(pipeline)) => src == pipeline.upcast_ref::<gst::Object>(),
                _ => false,
            };
            if from_pipeline {
                info!(
                    "Pipeline state changed: {:?} -> {:?} (pending: {:?})",
                    state_changed.old(),
                    state_changed.current(),
                    state_changed.pending()
                );
            }
        }
        _ => {}
    }
}
