//! Connection settings for the simulator link.
//!
//! Settings come from [`LinkConfig::default`] and can be overridden from the
//! environment:
//!
//! | Variable                | Meaning                              | Default     |
//! |-------------------------|--------------------------------------|-------------|
//! | `SIMLINK_HOST`          | simulator host                       | `127.0.0.1` |
//! | `SIMLINK_PORT`          | simulator port                       | `9091`      |
//! | `SIMLINK_POLL_INTERVAL` | pause before each poll, seconds      | `0.0`       |
//! | `SIMLINK_RETRY_DELAY`   | pause between connect attempts, sec. | `1.0`       |
//! | `SIMLINK_READ_CHUNK`    | bytes read per readable event        | `1024`      |

use std::time::Duration;

use thiserror::Error;

/// Default simulator host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default simulator port.
pub const DEFAULT_PORT: u16 = 9091;

/// Default number of bytes read per readable event.
pub const DEFAULT_READ_CHUNK: usize = 1024;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An override was present but could not be used.
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// The rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Settings for one simulator connection.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Simulator host name or address.
    pub host: String,
    /// Simulator TCP port.
    pub port: u16,
    /// Pause before every readiness wait. Zero only yields to the scheduler.
    pub poll_interval: Duration,
    /// Pause between failed connection attempts.
    pub retry_delay: Duration,
    /// Maximum bytes consumed per readable event.
    pub read_chunk_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_interval: Duration::ZERO,
            retry_delay: DEFAULT_RETRY_DELAY,
            read_chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}

impl LinkConfig {
    /// Create a configuration for the given endpoint with default timings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the pause before every readiness wait.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the pause between failed connection attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the number of bytes read per readable event.
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// `host:port`, for logging.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load the defaults, then apply any `SIMLINK_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override is present but
    /// malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("SIMLINK_HOST") {
            if host.trim().is_empty() {
                return Err(invalid("SIMLINK_HOST", host, "host is empty"));
            }
            config.host = host.trim().to_string();
        }

        if let Some(port) = lookup("SIMLINK_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid("SIMLINK_PORT", port.clone(), e))?;
        }

        if let Some(interval) = lookup("SIMLINK_POLL_INTERVAL") {
            config.poll_interval = parse_seconds("SIMLINK_POLL_INTERVAL", interval)?;
        }

        if let Some(delay) = lookup("SIMLINK_RETRY_DELAY") {
            config.retry_delay = parse_seconds("SIMLINK_RETRY_DELAY", delay)?;
        }

        if let Some(chunk) = lookup("SIMLINK_READ_CHUNK") {
            let size: usize = chunk
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid("SIMLINK_READ_CHUNK", chunk.clone(), e))?;
            if size == 0 {
                return Err(invalid("SIMLINK_READ_CHUNK", chunk, "must be at least 1"));
            }
            config.read_chunk_size = size;
        }

        Ok(config)
    }
}

/// Parse a non-negative number of seconds such as `0.001`.
fn parse_seconds(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    let seconds: f64 = match value.trim().parse() {
        Ok(seconds) => seconds,
        Err(e) => return Err(invalid(key, value, e)),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| invalid(key, value, e))
}

fn invalid(key: &'static str, value: String, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        reason: reason.to_string(),
    }
}
