use crate::body::DEFAULT_MAX_BODY_BYTES;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REQUEST_TTL_SECS: u64 = 120;
pub const DEFAULT_MAX_ENTRIES: usize = 200;
pub const DEFAULT_LOG_KEY: &str = "logs";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("max_body_bytes cannot be 0")]
    ZeroBodyCeiling,

    #[error("request_ttl_secs cannot be 0")]
    ZeroTtl,

    #[error("at least one tracked method is required")]
    NoTrackedMethods,

    #[error("empty tracked method")]
    EmptyMethod,

    #[error("max_entries cannot be 0")]
    ZeroRetention,

    #[error("invalid log key: {0:?}")]
    InvalidLogKey(String),
}

#[derive(Clone, Copy, Default, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zstd1,
    Zstd3,
}

impl Compression {
    pub fn zstd_level(&self) -> Option<i32> {
        match self {
            Compression::None => None,
            Compression::Zstd1 => Some(1),
            Compression::Zstd3 => Some(3),
        }
    }
}

/// Where the durable log lives.
#[derive(Clone, Default, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Process-local. Everything is lost on exit.
    #[default]
    Memory,
    Filesystem {
        base_dir: String,
        #[serde(default)]
        compression: Compression,
    },
}

/// Controls which requests are tracked and how much of them is kept in memory.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Body bytes retained per request across all fragments.
    pub max_body_bytes: usize,
    /// Maximum age of an unfinished request before the sweeper drops it.
    pub request_ttl_secs: u64,
    /// Methods worth tracking, compared case-insensitively.
    pub tracked_methods: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_ttl_secs: DEFAULT_REQUEST_TTL_SECS,
            tracked_methods: vec!["POST".into()],
        }
    }
}

impl CaptureConfig {
    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_body_bytes == 0 {
            return Err(ValidationError::ZeroBodyCeiling);
        }
        if self.request_ttl_secs == 0 {
            return Err(ValidationError::ZeroTtl);
        }
        if self.tracked_methods.is_empty() {
            return Err(ValidationError::NoTrackedMethods);
        }
        if self.tracked_methods.iter().any(|m| m.trim().is_empty()) {
            return Err(ValidationError::EmptyMethod);
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Name of the value holding the whole log in the store.
    pub key: String,
    /// Oldest entries are evicted beyond this many.
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            key: DEFAULT_LOG_KEY.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_entries == 0 {
            return Err(ValidationError::ZeroRetention);
        }
        // The key doubles as a file name for the filesystem store.
        let valid_key = !self.key.is_empty()
            && self
                .key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_key {
            return Err(ValidationError::InvalidLogKey(self.key.clone()));
        }
        Ok(())
    }
}

#[derive(Clone, Default, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.capture.validate()?;
        self.log.validate()?;
        Ok(())
    }
}
