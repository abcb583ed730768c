//! Startup configuration read from the environment.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::ServerError;
use crate::telemetry::LogFormat;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8989;

/// Default listen address
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default number of images a run is expected to predict
pub const DEFAULT_NUM_OF_IMAGES: i64 = 100;

/// Prediction calls allowed per expected image
pub const PREDICTIONS_PER_IMAGE: i64 = 1000;

/// Default cap on request bodies (16 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Server configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub num_of_images: i64,
    pub max_body_bytes: usize,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            num_of_images: DEFAULT_NUM_OF_IMAGES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// Unset variables fall back to their defaults; values that do not parse
    /// are configuration errors.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            num_of_images: parse_or(&lookup, "NUM_OF_IMAGES", DEFAULT_NUM_OF_IMAGES)?,
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
            log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::default())?,
        })
    }

    /// Total prediction calls permitted over the process lifetime.
    ///
    /// A negative image count yields a negative total, which rejects every call.
    pub const fn prediction_budget(&self) -> i64 {
        self.num_of_images.saturating_mul(PREDICTIONS_PER_IMAGE)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses `key` from the environment, or returns `default` when it is unset.
pub fn env_or<T>(key: &str, default: T) -> Result<T, ServerError>
where
    T: FromStr,
    T::Err: Display,
{
    parse_or(&|k: &str| std::env::var(k).ok(), key, default)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ServerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            ServerError::Configuration(format!("{key}={raw:?} is not valid: {e}"))
        }),
    }
}
