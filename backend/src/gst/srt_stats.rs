//! Normalization of the `srtsink` "stats" structure.
//!
//! Field names and value types differ between plugin versions and between
//! caller and listener mode, so every counter is looked up under several
//! names and accepted as any integer or floating type. Negative values mean
//! "not available" and map to `None`.

use gstreamer as gst;
use uplink_types::ReliableTransportStats;

const BYTES_SENT: &[&str] = &["bytes-sent-total", "bytes-sent"];
const PACKETS_SENT: &[&str] = &["packets-sent", "pkt-sent-total"];
const PACKETS_LOST: &[&str] = &["packets-sent-lost", "packets-lost", "pkt-snd-loss-total"];
const PACKETS_RETRANSMITTED: &[&str] = &["packets-retransmitted", "pkt-retrans-total"];
const PACKETS_DROPPED: &[&str] = &[
    "packets-sent-dropped",
    "packets-dropped",
    "pkt-snd-drop-total",
];
const RTT_MS: &[&str] = &["rtt-ms", "ms-rtt"];
const BANDWIDTH_MBPS: &[&str] = &["bandwidth-mbps", "mbps-bandwidth"];
const SEND_RATE_MBPS: &[&str] = &["send-rate-mbps", "mbps-send-rate"];

fn value_as_f64(value: &gst::glib::SendValue) -> Option<f64> {
    if let Ok(v) = value.get::<f64>() {
        return Some(v);
    }
    if let Ok(v) = value.get::<u64>() {
        return Some(v as f64);
    }
    if let Ok(v) = value.get::<i64>() {
        return Some(v as f64);
    }
    if let Ok(v) = value.get::<u32>() {
        return Some(f64::from(v));
    }
    if let Ok(v) = value.get::<i32>() {
        return Some(f64::from(v));
    }
    None
}

fn value_as_u64(value: &gst::glib::SendValue) -> Option<u64> {
    if let Ok(v) = value.get::<u64>() {
        return Some(v);
    }
    if let Ok(v) = value.get::<i64>() {
        return u64::try_from(v).ok();
    }
    if let Ok(v) = value.get::<u32>() {
        return Some(u64::from(v));
    }
    if let Ok(v) = value.get::<i32>() {
        return u64::try_from(v).ok();
    }
    value
        .get::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}

fn counter(stats: &gst::StructureRef, names: &[&str]) -> Option<u64> {
    names
        .iter()
        .find_map(|name| stats.value(*name).ok().and_then(value_as_u64))
}

fn measure(stats: &gst::StructureRef, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| {
        stats
            .value(*name)
            .ok()
            .and_then(value_as_f64)
            .filter(|v| v.is_finite() && *v >= 0.0)
    })
}

/// Map a sink statistics structure onto [`ReliableTransportStats`].
pub fn normalize_srt_stats(stats: &gst::StructureRef) -> ReliableTransportStats {
    ReliableTransportStats {
        bytes_sent_total: counter(stats, BYTES_SENT),
        packets_sent: counter(stats, PACKETS_SENT),
        packets_lost: counter(stats, PACKETS_LOST),
        packets_retransmitted: counter(stats, PACKETS_RETRANSMITTED),
        packets_dropped: counter(stats, PACKETS_DROPPED),
        rtt_ms: measure(stats, RTT_MS),
        bandwidth_estimate_bps: measure(stats, BANDWIDTH_MBPS).map(|mbps| (mbps * 1e6) as u64),
        send_rate_bps: measure(stats, SEND_RATE_MBPS).map(|mbps| mbps * 1e6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_gst() {
        let _ = gst::init();
    }

    #[test]
    fn test_caller_mode_fields() {
        init_gst();

        let stats = gst::Structure::builder("application/x-srt-statistics")
            .field("packets-sent", 1200i64)
            .field("packets-sent-lost", 6i32)
            .field("packets-retransmitted", 10i32)
            .field("packets-sent-dropped", 2i32)
            .field("bytes-sent", 1_579_200u64)
            .field("rtt-ms", 42.5f64)
            .field("bandwidth-mbps", 12.5f64)
            .field("send-rate-mbps", 3.2f64)
            .build();

        let normalized = normalize_srt_stats(&stats);

        assert_eq!(normalized.bytes_sent_total, Some(1_579_200));
        assert_eq!(normalized.packets_sent, Some(1200));
        assert_eq!(normalized.packets_lost, Some(6));
        assert_eq!(normalized.packets_retransmitted, Some(10));
        assert_eq!(normalized.packets_dropped, Some(2));
        assert_eq!(normalized.rtt_ms, Some(42.5));
        assert_eq!(normalized.bandwidth_estimate_bps, Some(12_500_000));
        let rate = normalized.send_rate_bps.unwrap();
        assert!((rate - 3_200_000.0).abs() < 1.0);
        assert!(normalized.is_reporting());
    }

    #[test]
    fn test_alternate_names() {
        init_gst();

        let stats = gst::Structure::builder("application/x-srt-statistics")
            .field("bytes-sent-total", 5000u64)
            .field("pkt-snd-loss-total", 3u32)
            .field("pkt-retrans-total", 4u32)
            .field("pkt-snd-drop-total", 1u32)
            .field("ms-rtt", 80i32)
            .build();

        let normalized = normalize_srt_stats(&stats);

        assert_eq!(normalized.bytes_sent_total, Some(5000));
        assert_eq!(normalized.packets_lost, Some(3));
        assert_eq!(normalized.packets_retransmitted, Some(4));
        assert_eq!(normalized.packets_dropped, Some(1));
        assert_eq!(normalized.rtt_ms, Some(80.0));
        assert_eq!(normalized.bandwidth_estimate_bps, None);
    }

    #[test]
    fn test_negative_and_missing_values() {
        init_gst();

        let stats = gst::Structure::builder("application/x-srt-statistics")
            .field("packets-sent", -1i64)
            .field("rtt-ms", -1.0f64)
            .build();

        let normalized = normalize_srt_stats(&stats);

        assert_eq!(normalized.packets_sent, None);
        assert_eq!(normalized.rtt_ms, None);
        assert_eq!(normalized.bytes_sent_total, None);
        assert!(!normalized.is_reporting());
    }
}
