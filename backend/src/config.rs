//! Configuration management.

use crate::abr::AbrSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uplink_types::{StreamConfig, TransportMode};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = ".uplink.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    pub log_level: Option<String>,
}

/// Application configuration, matching the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub abr: AbrSettings,
    pub logging: LoggingConfig,
}

/// Values given on the command line. `None` leaves lower layers untouched.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub transport: Option<TransportMode>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub stream_id: Option<String>,
    pub passphrase: Option<String>,
    pub video_bitrate: Option<u32>,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are merged in this order:
    /// 1. `config.toml` in user config directory (~/.config/uplink/ on Linux)
    /// 2. `.uplink.toml` in current directory
    /// 3. the file passed with `--config`, which must exist
    ///
    /// Environment variables use the `UPLINK_` prefix with `__` between
    /// nesting levels, e.g. `UPLINK_STREAM__SRT_LATENCY_MS=800`.
    pub fn from_figment(cli: &CliOverrides) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(LOCAL_CONFIG_FILE));
        let user_config = directories::ProjectDirs::from("", "", "uplink")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Priority: defaults < user config < local config < explicit file < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        for path in [user_config, local_config].into_iter().flatten() {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = cli.config_file {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("UPLINK_").split("__"));

        if let Some(transport) = cli.transport {
            figment = figment.merge(Serialized::default("stream.transport", transport));
        }
        if let Some(ref host) = cli.host {
            figment = figment.merge(Serialized::default("stream.host", host));
        }
        if let Some(port) = cli.port {
            figment = figment.merge(Serialized::default("stream.port", port));
        }
        if let Some(ref stream_id) = cli.stream_id {
            figment = figment.merge(Serialized::default("stream.stream_id", stream_id));
        }
        if let Some(ref passphrase) = cli.passphrase {
            figment = figment.merge(Serialized::default("stream.passphrase", passphrase));
        }
        if let Some(bitrate) = cli.video_bitrate {
            figment = figment.merge(Serialized::default("stream.video.bitrate", bitrate));
        }
        if let Some(ref level) = cli.log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }

        Ok(figment.extract()?)
    }
}
