//! Pipeline description for `gst::parse::launch`.

use gstreamer as gst;
use uplink_types::{StreamConfig, TransportMode};

/// Element names the engine looks up after parsing.
pub const VIDEO_SRC: &str = "video_src";
pub const AUDIO_SRC: &str = "audio_src";
pub const VIDEO_ENCODER: &str = "video_enc";
pub const MUXER: &str = "mux";
pub const TRANSPORT_SINK: &str = "transport_sink";

/// AAC encoders in order of preference.
const AAC_ENCODERS: &[&str] = &["voaacenc", "avenc_aac", "fdkaacenc"];

/// Pick the first AAC encoder available in the registry.
///
/// Requires GStreamer to be initialized.
pub fn select_aac_encoder() -> Option<&'static str> {
    AAC_ENCODERS
        .iter()
        .copied()
        .find(|name| gst::ElementFactory::find(name).is_some())
}

/// Quote a property value for the launch syntax.
fn quoted(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Build the launch description for a stream configuration.
///
/// Two live app sources feed an H.264 and an AAC branch, both muxed to
/// MPEG-TS and handed to either `udpsink` or `srtsink`.
pub fn build_launch_description(config: &StreamConfig, aac_encoder: &str) -> String {
    let video = &config.video;
    let audio = &config.audio;

    let mut desc = String::new();

    desc.push_str(&format!(
        "appsrc name={VIDEO_SRC} format=time is-live=true do-timestamp=true \
         caps=\"video/x-raw,format=NV21,width={w},height={h},framerate={fps}/1\" ! \
         videorate drop-only=true skip-to-first=true ! videoconvert ! videoscale ! \
         video/x-raw,width={w},height={h} ! \
         x264enc name={VIDEO_ENCODER} tune=zerolatency speed-preset={preset} \
         bitrate={kbps} key-int-max={gop} bframes={bframes} threads=2 ! \
         queue name=video_queue max-size-buffers=3 leaky=downstream ! {MUXER}. ",
        w = video.width,
        h = video.height,
        fps = video.frame_rate,
        preset = video.preset.as_str(),
        kbps = video.bitrate_kbps(),
        gop = video.gop_size(),
        bframes = video.b_frames,
    ));

    desc.push_str(&format!(
        "appsrc name={AUDIO_SRC} format=time is-live=true do-timestamp=true \
         caps=\"audio/x-raw,format=S16LE,layout=interleaved,rate={rate},channels={channels}\" ! \
         audiorate skip-to-first=true ! audioconvert ! audioresample ! \
         {aac_encoder} bitrate={abps} ! aacparse ! \
         queue name=audio_queue max-size-buffers=3 leaky=downstream ! {MUXER}. ",
        rate = audio.sample_rate,
        channels = audio.channels,
        abps = audio.bitrate,
    ));

    desc.push_str(&format!("mpegtsmux name={MUXER} alignment=7 ! "));

    match config.transport {
        TransportMode::Udp => {
            desc.push_str(&format!(
                "udpsink name={TRANSPORT_SINK} host={} port={} sync=false async=false",
                quoted(&config.host),
                config.port
            ));
        }
        TransportMode::Srt => {
            desc.push_str(&format!(
                "srtsink name={TRANSPORT_SINK} uri={} mode=caller latency={} wait-for-connection=false",
                quoted(&config.srt_uri()),
                config.srt_latency_ms
            ));
            if let Some(stream_id) = config.stream_id.as_deref().filter(|s| !s.is_empty()) {
                desc.push_str(&format!(" streamid={}", quoted(stream_id)));
            }
            if let Some(passphrase) = config.passphrase.as_deref().filter(|s| !s.is_empty()) {
                desc.push_str(&format!(" passphrase={}", quoted(passphrase)));
            }
        }
    }

    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplink_types::EncoderPreset;

    #[test]
    fn test_udp_description() {
        let config = StreamConfig::new(TransportMode::Udp, "10.0.0.5", 9000);
        let desc = build_launch_description(&config, "voaacenc");

        assert!(desc.contains("appsrc name=video_src"));
        assert!(desc.contains("format=NV21,width=1920,height=1080,framerate=30/1"));
        assert!(desc.contains("x264enc name=video_enc tune=zerolatency speed-preset=ultrafast"));
        assert!(desc.contains("bitrate=4000 key-int-max=60 bframes=0"));
        assert!(desc.contains("voaacenc bitrate=128000"));
        assert!(desc.contains("rate=48000,channels=2"));
        assert!(desc.contains("mpegtsmux name=mux alignment=7"));
        assert!(desc.contains("udpsink name=transport_sink host=\"10.0.0.5\" port=9000"));
        assert!(!desc.contains("srtsink"));
    }

    #[test]
    fn test_srt_description_with_credentials() {
        let mut config = StreamConfig::new(TransportMode::Srt, "ingest.example.com", 7001);
        config.stream_id = Some("live/cam1".to_string());
        config.passphrase = Some("pa\"ss".to_string());
        config.srt_latency_ms = 800;

        let desc = build_launch_description(&config, "avenc_aac");

        assert!(desc.contains(
            "srtsink name=transport_sink uri=\"srt://ingest.example.com:7001?streamid=live/cam1\""
        ));
        assert!(desc.contains("mode=caller latency=800 wait-for-connection=false"));
        assert!(desc.contains("streamid=\"live/cam1\""));
        assert!(desc.contains("passphrase=\"pa\\\"ss\""));
        assert!(desc.contains("avenc_aac bitrate="));
        assert!(!desc.contains("udpsink"));
    }

    #[test]
    fn test_srt_description_omits_empty_credentials() {
        let mut config = StreamConfig::new(TransportMode::Srt, "127.0.0.1", 9000);
        config.stream_id = Some(String::new());

        let desc = build_launch_description(&config, "voaacenc");

        assert!(desc.contains("uri=\"srt://127.0.0.1:9000\""));
        assert!(!desc.contains("streamid="));
        assert!(!desc.contains("passphrase="));
    }

    #[test]
    fn test_encoder_settings_follow_config() {
        let mut config = StreamConfig::default();
        config.video.frame_rate = 25;
        config.video.keyframe_interval_secs = 4;
        config.video.b_frames = 2;
        config.video.bitrate = 2_500_000;
        config.video.preset = EncoderPreset::Veryfast;

        let desc = build_launch_description(&config, "voaacenc");

        assert!(desc.contains("speed-preset=veryfast"));
        assert!(desc.contains("bitrate=2500 key-int-max=100 bframes=2"));
        assert!(desc.contains("framerate=25/1"));
    }
}
