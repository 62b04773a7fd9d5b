//! Stream telemetry aggregation.
//!
//! Merges the two possible telemetry sources into one [`StreamStats`]:
//! the sender statistics of a reliable-transport sink when it is reporting,
//! otherwise the raw byte counter fed by the output probe. The send rate is
//! a windowed figure so that fast polling does not divide small byte deltas
//! by small time deltas.

use std::time::{Duration, Instant};
use tracing::{debug, trace};
use uplink_types::{
    ConnectionState, ReliableTransportStats, StreamConfig, StreamStats, TransportMode,
};

/// Minimum time between two send-rate samples.
pub const BITRATE_WINDOW: Duration = Duration::from_millis(1000);

/// Telemetry gathered for one refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryInput<'a> {
    /// Normalized reliable-transport stats, if the pipeline has such a sink
    pub reliable: Option<&'a ReliableTransportStats>,
    /// Bytes counted by the output probe since the session started
    pub fallback_bytes: u64,
    /// The engine reported a fatal error during this session
    pub engine_broken: bool,
}

/// Aggregates telemetry into a [`StreamStats`] snapshot for one session at a time.
#[derive(Debug, Clone)]
pub struct TelemetryAggregator {
    transport: TransportMode,
    nominal_bitrate_bps: f64,
    stats: StreamStats,
    session_start: Option<Instant>,
    last_bytes_sent: u64,
    last_sample_time: Instant,
    rate_measured: bool,
}

impl TelemetryAggregator {
    pub fn new(config: &StreamConfig, now: Instant) -> Self {
        Self {
            transport: config.transport,
            nominal_bitrate_bps: config.nominal_bitrate_bps(),
            stats: StreamStats::default(),
            session_start: None,
            last_bytes_sent: 0,
            last_sample_time: now,
            rate_measured: false,
        }
    }

    /// Reset all counters and markers for a new session starting at `now`.
    pub fn begin_session(&mut self, now: Instant) {
        self.stats = StreamStats {
            connection_state: match self.transport {
                // No handshake to wait for
                TransportMode::Udp => ConnectionState::Connected,
                TransportMode::Srt => ConnectionState::Connecting,
            },
            ..StreamStats::default()
        };
        self.session_start = Some(now);
        self.last_bytes_sent = 0;
        self.last_sample_time = now;
        self.rate_measured = false;
    }

    /// Freeze the snapshot at the end of a session.
    pub fn end_session(&mut self) {
        self.session_start = None;
        self.stats.connection_state = ConnectionState::Disconnected;
    }

    /// A session is in progress.
    pub fn is_active(&self) -> bool {
        self.session_start.is_some()
    }

    /// Recompute the snapshot from fresh telemetry.
    ///
    /// Outside a session the previous snapshot is returned untouched.
    pub fn refresh(&mut self, now: Instant, input: TelemetryInput<'_>) -> &StreamStats {
        let Some(session_start) = self.session_start else {
            return &self.stats;
        };

        let reporting = input.reliable.filter(|r| r.is_reporting());
        let observed_bytes = match reporting {
            Some(reliable) => {
                trace!("Using reliable transport stats: {:?}", reliable);
                self.stats.packets_lost = reliable.packets_lost.unwrap_or(self.stats.packets_lost);
                self.stats.packets_retransmitted = reliable
                    .packets_retransmitted
                    .unwrap_or(self.stats.packets_retransmitted);
                self.stats.packets_dropped =
                    reliable.packets_dropped.unwrap_or(self.stats.packets_dropped);
                self.stats.rtt_ms = reliable.rtt_ms.unwrap_or(self.stats.rtt_ms);
                self.stats.bandwidth_estimate_bps = reliable
                    .bandwidth_estimate_bps
                    .or(self.stats.bandwidth_estimate_bps);
                reliable.bytes_sent_total.unwrap_or(0)
            }
            None => {
                // Per-packet fields mean nothing without a feedback channel
                self.stats.packets_lost = 0;
                self.stats.packets_retransmitted = 0;
                self.stats.packets_dropped = 0;
                self.stats.rtt_ms = 0.0;
                self.stats.bandwidth_estimate_bps = None;
                input.fallback_bytes
            }
        };

        // A source switch must never make the total go backwards
        self.stats.bytes_sent = self.stats.bytes_sent.max(observed_bytes);

        self.update_bitrate(now, reporting);
        self.update_connection_state(input);

        self.stats.stream_duration_ms = now.saturating_duration_since(session_start).as_millis() as u64;

        debug!(
            "Telemetry refresh: {:.0} bps, {} bytes, lost={}, rtt={:.1} ms, state={}",
            self.stats.current_bitrate,
            self.stats.bytes_sent,
            self.stats.packets_lost,
            self.stats.rtt_ms,
            self.stats.connection_state
        );

        &self.stats
    }

    fn update_bitrate(&mut self, now: Instant, reporting: Option<&ReliableTransportStats>) {
        let elapsed = now.saturating_duration_since(self.last_sample_time);
        if elapsed >= BITRATE_WINDOW {
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
            let delta = self.stats.bytes_sent.saturating_sub(self.last_bytes_sent);
            self.stats.current_bitrate = delta as f64 * 8.0 * 1000.0 / elapsed_ms;
            self.last_bytes_sent = self.stats.bytes_sent;
            self.last_sample_time = now;
            self.rate_measured = true;
        } else if !self.rate_measured {
            self.stats.current_bitrate = reporting
                .and_then(|r| r.send_rate_bps)
                .filter(|rate| *rate > 0.0)
                .unwrap_or(self.nominal_bitrate_bps);
        }
    }

    fn update_connection_state(&mut self, input: TelemetryInput<'_>) {
        let packets_sent = input.reliable.and_then(|r| r.packets_sent).unwrap_or(0);

        self.stats.connection_state = if input.engine_broken {
            ConnectionState::Broken
        } else if !self.transport.is_reliable() || self.stats.bytes_sent > 0 || packets_sent > 0 {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        };
    }

    /// Copy of the current snapshot, without recomputing anything.
    pub fn snapshot(&self) -> StreamStats {
        self.stats.clone()
    }
}
