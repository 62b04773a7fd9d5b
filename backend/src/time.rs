//! Time sources for the telemetry window and the bitrate rate limiter.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// A simple time source that returns the current time using `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantTimeSrc(());

impl InstantTimeSrc {
    pub fn new() -> Self {
        InstantTimeSrc(())
    }
}

impl TimeSource for InstantTimeSrc {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A time source that only moves when told to.
///
/// Clones share the same clock, so a test can keep one and hand another to
/// the streamer.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    current: Arc<Mutex<Instant>>,
}

impl ManualTimeSource {
    pub fn new(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}
