//! GStreamer integration.

mod bus;
pub mod engine;
pub mod launch;
pub mod srt_stats;

pub use engine::{GstEngine, GstPipelineHandle};
pub use srt_stats::normalize_srt_stats;
