//! Configuration loading and validation.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:3000".parse().unwrap()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Every tunable named by the fan-out/filter/reaper/rate-gate design.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Planar-degree threshold past which a location update is broadcast
    /// rather than only stored (spec.md §4.3). ~11 m at mid-latitudes.
    #[serde(default = "default_movement_threshold_degrees")]
    pub movement_threshold_degrees: f64,

    /// Forced-heartbeat interval: a broadcast happens at least this often
    /// even when a driver is stationary (spec.md §4.3).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// A driver/user record is eligible for removal once its age exceeds
    /// this (spec.md §4.8).
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_timeout_secs: u64,

    /// Window during which a disconnected driver may resume its session
    /// without losing its record (spec.md §4.8).
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Reaper sweep interval (spec.md §4.8).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Fixed-window rate gate limit per producer connection (spec.md §4.2).
    #[serde(default = "default_max_updates_per_minute")]
    pub max_updates_per_minute: u32,

    /// Cap on drivers returned in a single `driversSnapshot` /
    /// `driversData` payload.
    #[serde(default = "default_max_snapshot_drivers")]
    pub max_snapshot_drivers: usize,

    /// Bound on outstanding pings a single driver can accumulate before
    /// the oldest is evicted (see DESIGN.md §11.3).
    #[serde(default = "default_max_waiting_passengers_per_driver")]
    pub max_waiting_passengers_per_driver: usize,

    /// Transport-level keepalive ping interval.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Transport-level keepalive ping timeout before the socket is
    /// considered dead.
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            movement_threshold_degrees: default_movement_threshold_degrees(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stale_timeout_secs: default_stale_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_updates_per_minute: default_max_updates_per_minute(),
            max_snapshot_drivers: default_max_snapshot_drivers(),
            max_waiting_passengers_per_driver: default_max_waiting_passengers_per_driver(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
        }
    }
}

fn default_movement_threshold_degrees() -> f64 {
    0.0001
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_stale_timeout_secs() -> u64 {
    300
}
fn default_grace_period_secs() -> u64 {
    30
}
fn default_cleanup_interval_secs() -> u64 {
    60
}
fn default_max_updates_per_minute() -> u32 {
    60
}
fn default_max_snapshot_drivers() -> usize {
    500
}
fn default_max_waiting_passengers_per_driver() -> usize {
    500
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_ping_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Validation errors surfaced at startup (mirrors the teacher's
/// `config::validate` pattern of collecting all problems at once instead
/// of failing on the first).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("limits.grace_period_secs must be less than limits.stale_timeout_secs")]
    GraceNotShorterThanStale,
    #[error("limits.cleanup_interval_secs must be greater than 0")]
    ZeroCleanupInterval,
    #[error("limits.max_updates_per_minute must be greater than 0")]
    ZeroRateLimit,
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.limits.grace_period_secs >= config.limits.stale_timeout_secs {
        errors.push(ValidationError::GraceNotShorterThanStale);
    }
    if config.limits.cleanup_interval_secs == 0 {
        errors.push(ValidationError::ZeroCleanupInterval);
    }
    if config.limits.max_updates_per_minute == 0 {
        errors.push(ValidationError::ZeroRateLimit);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_examples() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.grace_period_secs, 30);
        assert_eq!(limits.stale_timeout_secs, 300);
        assert_eq!(limits.cleanup_interval_secs, 60);
    }

    #[test]
    fn default_config_validates() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn grace_period_must_be_shorter_than_stale_timeout() {
        let mut config = Config::default();
        config.limits.grace_period_secs = 400;
        config.limits.stale_timeout_secs = 300;
        assert!(validate(&config).is_err());
    }
}
