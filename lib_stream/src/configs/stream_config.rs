//! # Stream Settings
//!
//! Every tunable of the collector in one serde struct, with defaults, validation and
//! the bearer credential loader. The struct is `camelCase` on the wire so it can be
//! read from the same JSON config files the other services use.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::counter::{DEFAULT_REFRESH, MIN_REFRESH};
use crate::storage::rotating_writer::{DEFAULT_MAX_FILE_SIZE, MIN_MAX_FILE_SIZE};

pub const DEFAULT_STREAM_URL: &str = "https://api.twitter.com/2/tweets/search/stream";
pub const DEFAULT_RULES_URL: &str = "https://api.twitter.com/2/tweets/search/stream/rules";
pub const DEFAULT_SAVE_PATH: &str = "data";
/// File name of the bearer credential, looked up in the home directory.
pub const DEFAULT_BEARER_FILE: &str = ".twiget.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read bearer file {path}: {source}")]
    ReadBearer {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bearer file {0} is empty")]
    EmptyBearer(PathBuf),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// # Stream Settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    pub stream_url: String,
    pub rules_url: String,
    pub save_path: PathBuf,
    /// Rotation threshold in bytes.
    pub max_file_size: u64,
    /// Prompt refresh interval, in events.
    pub refresh: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_line_bytes: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            rules_url: DEFAULT_RULES_URL.to_string(),
            save_path: PathBuf::from(DEFAULT_SAVE_PATH),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            refresh: DEFAULT_REFRESH,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_line_bytes: 8 * 1024 * 1024,
        }
    }
}

impl StreamSettings {
    /// Checks every field against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        for (field, url) in [("streamUrl", &self.stream_url), ("rulesUrl", &self.rules_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(field, format!("{url:?} is not an http(s) URL")));
            }
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(invalid("savePath", "must not be empty"));
        }
        if self.max_file_size < MIN_MAX_FILE_SIZE {
            return Err(invalid(
                "maxFileSize",
                format!("must be at least {MIN_MAX_FILE_SIZE} bytes"),
            ));
        }
        if self.refresh < MIN_REFRESH {
            return Err(invalid("refresh", format!("must be at least {MIN_REFRESH}")));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(invalid("reconnectBaseDelayMs", "must be greater than zero"));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(invalid(
                "reconnectMaxDelayMs",
                "must not be smaller than reconnectBaseDelayMs",
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(invalid("connectTimeoutSecs", "must be greater than zero"));
        }
        if self.read_timeout_secs == 0 {
            return Err(invalid("readTimeoutSecs", "must be greater than zero"));
        }
        if self.max_line_bytes == 0 {
            return Err(invalid("maxLineBytes", "must be greater than zero"));
        }
        Ok(())
    }

    #[cfg(feature = "ingestors")]
    pub fn reconnect_policy(&self) -> crate::ingestors::ReconnectPolicy {
        crate::ingestors::ReconnectPolicy {
            base_delay: std::time::Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: std::time::Duration::from_millis(self.reconnect_max_delay_ms),
        }
    }

    #[cfg(feature = "ingestors")]
    pub fn transport_timeouts(&self) -> crate::ingestors::TransportTimeouts {
        crate::ingestors::TransportTimeouts {
            connect: std::time::Duration::from_secs(self.connect_timeout_secs),
            read: std::time::Duration::from_secs(self.read_timeout_secs),
        }
    }
}

/// # Load Bearer
///
/// Reads the bearer token from the first line of `path`, surrounding whitespace
/// removed.
pub fn load_bearer(path: &Path) -> Result<String, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadBearer {
        path: path.to_path_buf(),
        source,
    })?;

    let bearer = content.lines().next().unwrap_or_default().trim();
    if bearer.is_empty() {
        return Err(ConfigError::EmptyBearer(path.to_path_buf()));
    }
    Ok(bearer.to_string())
}
