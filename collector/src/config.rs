use anyhow::{Context, Result};
use clap::Parser;
use lib_stream::configs::{StreamSettings, DEFAULT_BEARER_FILE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Config file read when `--config-path` is not given.
const DEFAULT_CONFIG_FILE: &str = "stream_collect.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Filtered stream collector", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(short = 'b', long, env = "STREAM_BEARER_FILE", help = "File holding the bearer token (default: ~/.twiget.conf).")]
    pub bearer_file: Option<PathBuf>,

    #[clap(short = 's', long, env = "STREAM_SAVE_PATH", help = "Directory where the JSON Lines files are written.")]
    pub save_path: Option<PathBuf>,

    #[clap(long, env = "STREAM_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STREAM_URL", help = "Filtered stream endpoint.")]
    pub stream_url: Option<String>,

    #[clap(long, env = "STREAM_RULES_URL", help = "Filter rules endpoint.")]
    pub rules_url: Option<String>,

    #[clap(long, env = "STREAM_MAX_FILE_SIZE", help = "Rotate output files once they reach this many bytes.")]
    pub max_file_size: Option<u64>,

    #[clap(long, env = "STREAM_REFRESH", help = "Redraw the prompt every N collected events.")]
    pub refresh: Option<u64>,

    #[clap(long, env = "STREAM_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds between reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "STREAM_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds between reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "STREAM_CONNECT_TIMEOUT_SECONDS", help = "Seconds allowed to establish the stream connection.")]
    pub connect_timeout_secs: Option<u64>,

    #[clap(long, env = "STREAM_READ_TIMEOUT_SECONDS", help = "Seconds without any data before the connection is considered dead.")]
    pub read_timeout_secs: Option<u64>,

    #[clap(long, env = "STREAM_MAX_LINE_BYTES", help = "Longest accepted stream line, in bytes.")]
    pub max_line_bytes: Option<usize>,

    #[clap(long, env = "STREAM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STREAM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            bearer_file: other.bearer_file.or(self.bearer_file),
            save_path: other.save_path.or(self.save_path),
            config_path: other.config_path.or(self.config_path),
            stream_url: other.stream_url.or(self.stream_url),
            rules_url: other.rules_url.or(self.rules_url),
            max_file_size: other.max_file_size.or(self.max_file_size),
            refresh: other.refresh.or(self.refresh),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
            read_timeout_secs: other.read_timeout_secs.or(self.read_timeout_secs),
            max_line_bytes: other.max_line_bytes.or(self.max_line_bytes),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    /// Library settings; anything unset keeps its library default.
    pub fn settings(&self) -> StreamSettings {
        let defaults = StreamSettings::default();
        StreamSettings {
            stream_url: self.stream_url.clone().unwrap_or(defaults.stream_url),
            rules_url: self.rules_url.clone().unwrap_or(defaults.rules_url),
            save_path: self.save_path.clone().unwrap_or(defaults.save_path),
            max_file_size: self.max_file_size.unwrap_or(defaults.max_file_size),
            refresh: self.refresh.unwrap_or(defaults.refresh),
            reconnect_base_delay_ms: self
                .reconnect_base_delay_ms
                .unwrap_or(defaults.reconnect_base_delay_ms),
            reconnect_max_delay_ms: self
                .reconnect_max_delay_ms
                .unwrap_or(defaults.reconnect_max_delay_ms),
            connect_timeout_secs: self.connect_timeout_secs.unwrap_or(defaults.connect_timeout_secs),
            read_timeout_secs: self.read_timeout_secs.unwrap_or(defaults.read_timeout_secs),
            max_line_bytes: self.max_line_bytes.unwrap_or(defaults.max_line_bytes),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// Defaults, then the JSON config file, then environment variables and CLI flags.
///
/// A missing default config file is fine; an explicitly requested one that cannot
/// be read or parsed is an error.
pub fn load_config(cli: Config) -> Result<Config> {
    let default_config = Config {
        save_path: Some(PathBuf::from(lib_stream::configs::DEFAULT_SAVE_PATH)),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        ..Default::default()
    };

    let explicit = cli.config_path.is_some();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = default_config;

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    } else if explicit {
        anyhow::bail!("Config file not found at {}", config_file_path.display());
    }

    current_config = current_config.merge(cli);

    if current_config.bearer_file.is_none() {
        match dirs::home_dir() {
            Some(home_dir) => current_config.bearer_file = Some(home_dir.join(DEFAULT_BEARER_FILE)),
            None => current_config.bearer_file = Some(PathBuf::from(DEFAULT_BEARER_FILE)),
        }
    }

    Ok(current_config)
}
