//! Streamer lifecycle state definitions.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a streamer.
///
/// `Uninitialized` -> `PipelineCreated` -> `Streaming` -> `Stopped`, with a
/// teardown returning to `Uninitialized` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LifecycleState {
    /// No pipeline exists
    #[default]
    Uninitialized,
    /// Pipeline built, not yet playing
    PipelineCreated,
    /// Pipeline playing; telemetry and bitrate adaptation are active
    Streaming,
    /// Pipeline stopped; it can be started again
    Stopped,
}

impl LifecycleState {
    /// A pipeline handle exists in this state.
    pub fn has_pipeline(&self) -> bool {
        !matches!(self, Self::Uninitialized)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::PipelineCreated => write!(f, "PIPELINE_CREATED"),
            Self::Streaming => write!(f, "STREAMING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}
