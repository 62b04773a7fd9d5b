//! Adaptive bitrate control.
//!
//! A rate-limited policy that looks at the aggregated stream stats and moves
//! the encoder bitrate between a floor and the configured ceiling. Changes
//! are evaluated at most every `eval_interval_ms` and only committed when
//! they exceed 5% of the current value, so the encoder is not renegotiated
//! on every bit of network noise.

use crate::engine::EncoderControl;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use uplink_types::{BitrateDecision, StreamStats};

/// Loss above this percentage triggers an aggressive cut.
const SEVERE_LOSS_PERCENT: f64 = 5.0;
/// RTT above this triggers an aggressive cut.
const SEVERE_RTT_MS: f64 = 500.0;
const ELEVATED_LOSS_PERCENT: f64 = 1.0;
const ELEVATED_RTT_MS: f64 = 200.0;
/// Below both of these the network is considered clean enough to raise.
const CLEAN_LOSS_PERCENT: f64 = 0.5;
const CLEAN_RTT_MS: f64 = 100.0;

const AGGRESSIVE_CUT_FACTOR: f64 = 0.70;
const CONSERVATIVE_CUT_FACTOR: f64 = 0.90;
const RAISE_FACTOR: f64 = 1.10;
/// Fraction of the sender bandwidth estimate the encoder may use.
const BANDWIDTH_HEADROOM: f64 = 0.80;
/// Minimum relative change (1/20 = 5%) worth committing.
const HYSTERESIS_DIVISOR: f64 = 20.0;

/// Tunables for the bitrate controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbrSettings {
    /// Adapt the encoder bitrate at all
    pub enabled: bool,
    /// Absolute floor in kbps
    pub min_floor_kbps: u32,
    /// Floor as a fraction of the ceiling (the larger floor wins)
    pub min_fraction: f64,
    /// Minimum time between evaluations in milliseconds
    pub eval_interval_ms: u64,
    /// Payload bytes per transport packet, used to estimate packet counts
    /// from byte totals (1316 = 7 TS packets per SRT/UDP datagram)
    pub assumed_packet_size: u32,
}

impl Default for AbrSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_floor_kbps: 500,
            min_fraction: 0.10,
            eval_interval_ms: 2000,
            assumed_packet_size: 1316,
        }
    }
}

impl AbrSettings {
    fn eval_interval(&self) -> Duration {
        Duration::from_millis(self.eval_interval_ms)
    }
}

/// Approximate loss rate in percent.
///
/// The packet count is estimated from the byte total since the byte-counting
/// path does not track packets.
pub fn estimate_loss_percent(bytes_sent: u64, packets_lost: u64, packet_size: u32) -> f64 {
    let estimated_packets = bytes_sent / u64::from(packet_size.max(1));
    let total = estimated_packets.saturating_add(packets_lost);
    if total == 0 {
        return 0.0;
    }
    100.0 * packets_lost as f64 / total as f64
}

/// A committed bitrate change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateAdjustment {
    pub from_kbps: u32,
    pub to_kbps: u32,
    pub decision: BitrateDecision,
    pub loss_percent: f64,
    pub rtt_ms: f64,
}

/// Snapshot of the controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbrStatus {
    pub current_kbps: u32,
    pub target_kbps: u32,
    pub min_kbps: u32,
    pub max_kbps: u32,
    pub last_adjust: Instant,
}

/// Adaptive bitrate controller for one streaming session.
#[derive(Debug, Clone)]
pub struct BitrateController {
    settings: AbrSettings,
    current_kbps: u32,
    target_kbps: u32,
    min_kbps: u32,
    max_kbps: u32,
    last_adjust: Instant,
}

impl BitrateController {
    /// Create a controller whose ceiling is the configured video bitrate.
    ///
    /// The encoder starts at the ceiling; the rate limiter counts from `now`.
    pub fn new(max_kbps: u32, settings: AbrSettings, now: Instant) -> Self {
        let fraction_floor = (f64::from(max_kbps) * settings.min_fraction) as u32;
        let min_kbps = settings.min_floor_kbps.max(fraction_floor).min(max_kbps);

        debug!(
            "Bitrate controller bounds: min={} kbps, max={} kbps",
            min_kbps, max_kbps
        );

        Self {
            settings,
            current_kbps: max_kbps,
            target_kbps: max_kbps,
            min_kbps,
            max_kbps,
            last_adjust: now,
        }
    }

    pub fn status(&self) -> AbrStatus {
        AbrStatus {
            current_kbps: self.current_kbps,
            target_kbps: self.target_kbps,
            min_kbps: self.min_kbps,
            max_kbps: self.max_kbps,
            last_adjust: self.last_adjust,
        }
    }

    pub fn current_kbps(&self) -> u32 {
        self.current_kbps
    }

    /// Evaluate the latest stats and, if warranted, push a new bitrate to the encoder.
    ///
    /// Returns the committed change, if any. A rejected encoder update commits nothing.
    pub fn evaluate(
        &mut self,
        stats: &StreamStats,
        now: Instant,
        encoder: &dyn EncoderControl,
    ) -> Option<BitrateAdjustment> {
        if !self.settings.enabled {
            return None;
        }

        if now.saturating_duration_since(self.last_adjust) < self.settings.eval_interval() {
            trace!("Bitrate evaluation skipped: inside rate-limit window");
            return None;
        }

        let loss_percent = estimate_loss_percent(
            stats.bytes_sent,
            stats.packets_lost,
            self.settings.assumed_packet_size,
        );
        let rtt_ms = stats.rtt_ms;
        let current = f64::from(self.current_kbps);

        let (mut proposed, mut decision) =
            if loss_percent > SEVERE_LOSS_PERCENT || rtt_ms > SEVERE_RTT_MS {
                (current * AGGRESSIVE_CUT_FACTOR, Some(BitrateDecision::AggressiveCut))
            } else if loss_percent > ELEVATED_LOSS_PERCENT || rtt_ms > ELEVATED_RTT_MS {
                (current * CONSERVATIVE_CUT_FACTOR, Some(BitrateDecision::ConservativeCut))
            } else if loss_percent < CLEAN_LOSS_PERCENT
                && rtt_ms < CLEAN_RTT_MS
                && self.current_kbps < self.max_kbps
            {
                (
                    (current * RAISE_FACTOR).min(f64::from(self.max_kbps)),
                    Some(BitrateDecision::Raise),
                )
            } else {
                (current, None)
            };

        // The sender's bandwidth estimate can only lower the choice
        if let Some(bandwidth_bps) = stats.bandwidth_estimate_bps.filter(|bw| *bw > 0) {
            let ceiling_kbps = bandwidth_bps as f64 / 1000.0 * BANDWIDTH_HEADROOM;
            if proposed > ceiling_kbps {
                proposed = ceiling_kbps;
                decision = Some(BitrateDecision::BandwidthCeiling);
            }
        }

        let new_kbps = (proposed.round() as u32).clamp(self.min_kbps, self.max_kbps);
        let change = f64::from(new_kbps.abs_diff(self.current_kbps));
        if change <= current / HYSTERESIS_DIVISOR {
            trace!(
                "Bitrate change {} -> {} kbps below hysteresis threshold",
                self.current_kbps,
                new_kbps
            );
            return None;
        }

        let decision = decision?;

        if let Err(e) = encoder.set_encoder_bitrate_kbps(new_kbps) {
            warn!("Encoder rejected bitrate {} kbps: {}", new_kbps, e);
            return None;
        }

        let adjustment = BitrateAdjustment {
            from_kbps: self.current_kbps,
            to_kbps: new_kbps,
            decision,
            loss_percent,
            rtt_ms,
        };

        info!(
            "Bitrate {} -> {} kbps ({}, loss {:.2}%, rtt {:.0} ms)",
            adjustment.from_kbps, adjustment.to_kbps, decision, loss_percent, rtt_ms
        );

        self.current_kbps = new_kbps;
        self.target_kbps = new_kbps;
        self.last_adjust = now;

        Some(adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use parking_lot::Mutex;

    const PACKET: u64 = 1316;

    #[derive(Default)]
    struct RecordingEncoder {
        applied: Mutex<Vec<u32>>,
        reject: bool,
    }

    impl EncoderControl for RecordingEncoder {
        fn set_encoder_bitrate_kbps(&self, kbps: u32) -> Result<(), EngineError> {
            if self.reject {
                return Err(EngineError::Bitrate("encoder gone".to_string()));
            }
            self.applied.lock().push(kbps);
            Ok(())
        }
    }

    /// Stats with the given loss percentage over 1000 estimated packets.
    fn stats_with(loss_per_mille: u64, rtt_ms: f64) -> StreamStats {
        StreamStats {
            bytes_sent: (1000 - loss_per_mille) * PACKET,
            packets_lost: loss_per_mille,
            rtt_ms,
            ..Default::default()
        }
    }

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    #[test]
    fn test_bounds_initialization() {
        let t0 = Instant::now();
        let controller = BitrateController::new(4000, AbrSettings::default(), t0);
        let status = controller.status();
        assert_eq!(status.max_kbps, 4000);
        assert_eq!(status.min_kbps, 500);
        assert_eq!(status.current_kbps, 4000);
        assert_eq!(status.target_kbps, 4000);

        let controller = BitrateController::new(12_000, AbrSettings::default(), t0);
        assert_eq!(controller.status().min_kbps, 1200);

        // A ceiling under the absolute floor pins both bounds to it
        let controller = BitrateController::new(300, AbrSettings::default(), t0);
        assert_eq!(controller.status().min_kbps, 300);
    }

    #[test]
    fn test_loss_estimate() {
        assert_eq!(estimate_loss_percent(0, 0, 1316), 0.0);
        assert_eq!(estimate_loss_percent(94 * PACKET, 6, 1316), 6.0);
        assert!((estimate_loss_percent(998 * PACKET, 2, 1316) - 0.2).abs() < 1e-9);
        assert_eq!(estimate_loss_percent(0, 10, 1316), 100.0);
    }

    #[test]
    fn test_heavy_loss_cuts_aggressively() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(4000, AbrSettings::default(), t0);

        let stats = stats_with(60, 50.0);
        let adjustment = controller.evaluate(&stats, secs(t0, 2), &encoder).unwrap();

        assert_eq!(adjustment.to_kbps, 2800);
        assert_eq!(adjustment.decision, BitrateDecision::AggressiveCut);
        assert_eq!(controller.current_kbps(), 2800);
        assert_eq!(*encoder.applied.lock(), vec![2800]);
    }

    #[test]
    fn test_clean_network_raises_towards_ceiling() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(4000, AbrSettings::default(), t0);
        controller.evaluate(&stats_with(60, 50.0), secs(t0, 2), &encoder);
        assert_eq!(controller.current_kbps(), 2800);

        let clean = stats_with(2, 50.0);
        let adjustment = controller.evaluate(&clean, secs(t0, 4), &encoder).unwrap();
        assert_eq!(adjustment.to_kbps, 3080);
        assert_eq!(adjustment.decision, BitrateDecision::Raise);

        let mut t = 4;
        for _ in 0..10 {
            t += 2;
            controller.evaluate(&clean, secs(t0, t), &encoder);
            assert!(controller.current_kbps() <= 4000);
        }
        assert_eq!(controller.current_kbps(), 4000);
        assert_eq!(*encoder.applied.lock(), vec![2800, 3080, 3388, 3727, 4000]);
    }

    #[test]
    fn test_bandwidth_estimate_caps_hold_decision() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(3000, AbrSettings::default(), t0);

        // Clean network at the ceiling would hold at 3000
        let stats = StreamStats {
            bandwidth_estimate_bps: Some(2_000_000),
            ..stats_with(0, 20.0)
        };
        let adjustment = controller.evaluate(&stats, secs(t0, 2), &encoder).unwrap();
        assert_eq!(adjustment.to_kbps, 1600);
        assert_eq!(adjustment.decision, BitrateDecision::BandwidthCeiling);
    }

    #[test]
    fn test_bandwidth_estimate_never_raises() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(4000, AbrSettings::default(), t0);

        let stats = StreamStats {
            bandwidth_estimate_bps: Some(100_000_000),
            ..stats_with(60, 50.0)
        };
        let adjustment = controller.evaluate(&stats, secs(t0, 2), &encoder).unwrap();
        assert_eq!(adjustment.to_kbps, 2800);
        assert_eq!(adjustment.decision, BitrateDecision::AggressiveCut);
    }

    #[test]
    fn test_cuts_never_go_below_floor() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(4000, AbrSettings::default(), t0);

        let lossy = stats_with(100, 800.0);
        let mut t = 0;
        for _ in 0..20 {
            t += 2;
            controller.evaluate(&lossy, secs(t0, t), &encoder);
            let status = controller.status();
            assert!(status.min_kbps <= status.current_kbps);
            assert!(status.current_kbps <= status.max_kbps);
        }
        assert_eq!(controller.current_kbps(), 500);
    }

    #[test]
    fn test_bounds_hold_across_mixed_conditions() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(6000, AbrSettings::default(), t0);

        let conditions = [
            (0, 10.0, None),
            (30, 150.0, Some(9_000_000)),
            (80, 600.0, None),
            (0, 10.0, Some(700_000)),
            (4, 90.0, Some(50_000_000)),
            (0, 0.0, None),
        ];
        let mut t = 0;
        for _ in 0..5 {
            for (loss, rtt, bandwidth) in conditions {
                t += 2;
                let stats = StreamStats {
                    bandwidth_estimate_bps: bandwidth,
                    ..stats_with(loss, rtt)
                };
                controller.evaluate(&stats, secs(t0, t), &encoder);
                let status = controller.status();
                assert!(status.min_kbps <= status.current_kbps, "{:?}", status);
                assert!(status.current_kbps <= status.max_kbps, "{:?}", status);
            }
        }
    }

    #[test]
    fn test_small_change_is_discarded() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(4000, AbrSettings::default(), t0);

        // Ceiling 3920 kbps is only 2% below the current 4000
        let stats = StreamStats {
            bandwidth_estimate_bps: Some(4_900_000),
            ..stats_with(0, 20.0)
        };
        assert!(controller.evaluate(&stats, secs(t0, 2), &encoder).is_none());

        let status = controller.status();
        assert_eq!(status.current_kbps, 4000);
        assert_eq!(status.last_adjust, t0);
        assert!(encoder.applied.lock().is_empty());
    }

    #[test]
    fn test_rate_limit_blocks_second_evaluation() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let mut controller = BitrateController::new(4000, AbrSettings::default(), t0);
        let lossy = stats_with(60, 50.0);

        // Inside the first window after session start
        assert!(controller
            .evaluate(&lossy, t0 + Duration::from_millis(1999), &encoder)
            .is_none());

        assert!(controller.evaluate(&lossy, secs(t0, 2), &encoder).is_some());
        assert!(controller
            .evaluate(&lossy, secs(t0, 2) + Duration::from_millis(1500), &encoder)
            .is_none());
        assert_eq!(controller.current_kbps(), 2800);

        assert!(controller.evaluate(&lossy, secs(t0, 4), &encoder).is_some());
        assert_eq!(controller.current_kbps(), 1960);
    }

    #[test]
    fn test_rejected_encoder_update_commits_nothing() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder {
            reject: true,
            ..Default::default()
        };
        let mut controller = BitrateController::new(4000, AbrSettings::default(), t0);

        assert!(controller
            .evaluate(&stats_with(60, 50.0), secs(t0, 2), &encoder)
            .is_none());
        let status = controller.status();
        assert_eq!(status.current_kbps, 4000);
        assert_eq!(status.last_adjust, t0);
    }

    #[test]
    fn test_disabled_controller_never_adjusts() {
        let t0 = Instant::now();
        let encoder = RecordingEncoder::default();
        let settings = AbrSettings {
            enabled: false,
            ..Default::default()
        };
        let mut controller = BitrateController::new(4000, settings, t0);
        assert!(controller
            .evaluate(&stats_with(100, 900.0), secs(t0, 10), &encoder)
            .is_none());
    }
}
