//! Configuration management for shardkeeper
//!
//! Process-level settings are loaded from environment variables or a TOML
//! file. Per-job configuration lives in [`job::JobConfig`] and is shared
//! through the coordination store.

pub mod job;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use job::{JobConfig, JobConfigBuilder};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Coordination timing and identity
    pub coordinator: CoordinatorSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Coordination timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Maximum wait for a distributed lock in milliseconds
    pub lock_timeout_ms: u64,

    /// Maximum wait for a leader to appear in milliseconds
    pub leader_wait_timeout_ms: u64,

    /// Maximum wait for a reshard (or running items) to finish in milliseconds
    pub sharding_wait_timeout_ms: u64,

    /// Poll interval used by bounded waits in milliseconds
    pub poll_interval_ms: u64,

    /// Capacity of each job's trigger channel
    pub trigger_queue_capacity: usize,

    /// Override of the detected local IP address
    #[serde(default)]
    pub local_ip: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = CoordinatorSettings::default();

        let lock_timeout_ms = env_parse("SHARDKEEPER_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms);
        let leader_wait_timeout_ms = env_parse(
            "SHARDKEEPER_LEADER_WAIT_TIMEOUT_MS",
            defaults.leader_wait_timeout_ms,
        );
        let sharding_wait_timeout_ms = env_parse(
            "SHARDKEEPER_SHARDING_WAIT_TIMEOUT_MS",
            defaults.sharding_wait_timeout_ms,
        );
        let poll_interval_ms = env_parse("SHARDKEEPER_POLL_INTERVAL_MS", defaults.poll_interval_ms);
        let trigger_queue_capacity = env_parse(
            "SHARDKEEPER_TRIGGER_QUEUE_CAPACITY",
            defaults.trigger_queue_capacity,
        );
        let local_ip = std::env::var("SHARDKEEPER_LOCAL_IP").ok();

        let log_level =
            std::env::var("SHARDKEEPER_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format =
            std::env::var("SHARDKEEPER_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            coordinator: CoordinatorSettings {
                lock_timeout_ms,
                leader_wait_timeout_ms,
                sharding_wait_timeout_ms,
                poll_interval_ms,
                trigger_queue_capacity,
                local_ip,
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML settings file: {}", path.display()))?;

        Ok(settings)
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        let c = &self.coordinator;

        if c.lock_timeout_ms == 0 {
            anyhow::bail!("lock_timeout_ms must be greater than 0");
        }

        if c.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if c.poll_interval_ms > c.leader_wait_timeout_ms
            || c.poll_interval_ms > c.sharding_wait_timeout_ms
        {
            anyhow::bail!("poll_interval_ms must not exceed the wait timeouts");
        }

        if c.trigger_queue_capacity == 0 {
            anyhow::bail!("trigger_queue_capacity must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorSettings::default(),
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

impl CoordinatorSettings {
    /// Distributed lock timeout
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Leader wait timeout
    #[must_use]
    pub fn leader_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.leader_wait_timeout_ms)
    }

    /// Sharding wait timeout
    #[must_use]
    pub fn sharding_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.sharding_wait_timeout_ms)
    }

    /// Poll interval for bounded waits
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            leader_wait_timeout_ms: 10_000,
            sharding_wait_timeout_ms: 30_000,
            poll_interval_ms: 100,
            trigger_queue_capacity: 16,
            local_ip: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
