//! Uplink command-line driver.
//!
//! Streams a synthetic test pattern and silence to the configured target and
//! logs stats once a second until interrupted.

use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use uplink::config::{AppConfig, CliOverrides, LoggingConfig};
use uplink::{EventBroadcaster, GstEngine, Streamer};
use uplink_types::{StreamConfig, TransportMode};

/// Uplink - live audio/video uplink with adaptive bitrate
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Extra config file, merged above `.uplink.toml`
    #[arg(short, long, env = "UPLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Transport to use (srt or udp)
    #[arg(short, long, value_parser = parse_transport)]
    transport: Option<TransportMode>,

    /// Target host
    #[arg(long)]
    host: Option<String>,

    /// Target port
    #[arg(short, long)]
    port: Option<u16>,

    /// SRT stream id
    #[arg(long)]
    stream_id: Option<String>,

    /// SRT passphrase
    #[arg(long, env = "UPLINK_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Initial (and maximum) video bitrate in bps
    #[arg(long)]
    video_bitrate: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Stop after this many seconds (runs until Ctrl-C if unset)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print stats as JSON lines instead of log records
    #[arg(long)]
    json: bool,
}

fn parse_transport(value: &str) -> Result<TransportMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "srt" => Ok(TransportMode::Srt),
        "udp" => Ok(TransportMode::Udp),
        other => Err(format!("unknown transport '{}', expected srt or udp", other)),
    }
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_file: self.config.clone(),
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            stream_id: self.stream_id.clone(),
            passphrase: self.passphrase.clone(),
            video_bitrate: self.video_bitrate,
            log_level: self.log_level.clone(),
        }
    }
}

/// Install stdout logging plus an optional log file. The returned guard must
/// live until exit so buffered file output is flushed.
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let level = logging.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let stdout_layer = fmt::layer().with_target(false).compact();

    let (file_layer, guard) = match logging.log_file {
        Some(ref path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Push a flat test pattern and silence at the configured rates until `quit`.
fn spawn_test_source(
    streamer: Arc<Streamer<GstEngine>>,
    config: StreamConfig,
    quit: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("uplink-test-source".to_string())
        .spawn(move || {
            let video = &config.video;
            let audio = &config.audio;
            let luma = (video.width * video.height) as usize;
            let mut frame = vec![128u8; luma + luma / 2];

            let frame_interval_ns = 1_000_000_000 / u64::from(video.frame_rate.max(1));
            let audio_chunk_samples = audio.sample_rate / 50;
            let silence = vec![0u8; (audio_chunk_samples * audio.channels * 2) as usize];
            let audio_chunk = Duration::from_millis(20);

            let started = std::time::Instant::now();
            let mut frames: u64 = 0;
            let mut audio_sent = Duration::ZERO;

            while !quit.load(Ordering::SeqCst) {
                let elapsed = started.elapsed();

                while Duration::from_nanos(frame_interval_ns * frames) <= elapsed {
                    frame[..luma].fill((frames % 220) as u8 + 16);
                    let ts = (frame_interval_ns * frames) as i64;
                    streamer.push_video_frame(&frame, video.width, video.height, ts);
                    frames += 1;
                }

                while audio_sent <= elapsed {
                    streamer.push_audio_samples(
                        &silence,
                        audio.sample_rate,
                        audio.channels,
                        audio_sent.as_nanos() as i64,
                    );
                    audio_sent += audio_chunk;
                }

                std::thread::sleep(Duration::from_millis(5));
            }
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::from_figment(&args.overrides())?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Starting uplink...");
    uplink::initialize()?;

    let events = EventBroadcaster::default();
    let mut event_stream = Box::pin(events.stream());
    tokio::spawn(async move {
        while let Some(event) = event_stream.next().await {
            if event.is_error() {
                error!("{}", event.description());
            } else {
                info!("{}", event.description());
            }
        }
    });

    let streamer = Arc::new(Streamer::new(GstEngine::new(), events, config.abr.clone()));
    streamer.create_pipeline(config.stream.clone())?;
    let session_id = streamer.start()?;
    info!("Session {} running", session_id);

    let quit = Arc::new(AtomicBool::new(false));
    let source = spawn_test_source(streamer.clone(), config.stream.clone(), quit.clone())?;

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = streamer.get_stats();
                if args.json {
                    println!("{}", serde_json::to_string(&stats)?);
                } else {
                    info!(
                        "{:.0} kbps, {} bytes, lost={}, rtt={:.1} ms, {}",
                        stats.current_bitrate / 1000.0,
                        stats.bytes_sent,
                        stats.packets_lost,
                        stats.rtt_ms,
                        stats.connection_state
                    );
                }
            }
            _ = &mut deadline => {
                info!("Duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    quit.store(true, Ordering::SeqCst);
    if source.join().is_err() {
        error!("Test source thread panicked");
    }

    streamer.stop();
    let ingest = streamer.ingest_stats();
    info!(
        "Pushed {} video frames, {} audio buffers ({} rejected)",
        ingest.video_frames, ingest.audio_buffers, ingest.rejected_buffers
    );
    streamer.destroy();

    // Let the event task drain the final events
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
