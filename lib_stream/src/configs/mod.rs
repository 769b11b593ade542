//! # Configuration
//!
//! Settings shared by the library and the collector binary.

pub mod stream_config;

pub use stream_config::{
    load_bearer, ConfigError, StreamSettings, DEFAULT_BEARER_FILE, DEFAULT_RULES_URL,
    DEFAULT_SAVE_PATH, DEFAULT_STREAM_URL,
};
