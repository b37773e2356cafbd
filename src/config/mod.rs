//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrets::SecretString;
use std::str::FromStr;

/// What happens to a tracker once its chunk has completed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Delete the tracker as soon as the completion cascade has run.
    #[default]
    Purge,
    /// Keep the tracker as `COMPLETED` until explicitly purged.
    Retain,
}

impl FromStr for Retention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "purge" => Ok(Retention::Purge),
            "retain" => Ok(Retention::Retain),
            other => Err(Error::Config(format!(
                "unknown retention policy '{other}' (expected purge or retain)"
            ))),
        }
    }
}

/// Scheduling settings shared by the tracking map and service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Number of partitions the tracking map is split into.
    pub partitions: usize,
    pub retention: Retention,
    /// Enqueued chunks per sink and phase before submission switches to bulk.
    pub max_enqueued_per_sink: usize,
    /// Enqueued count at or below which bulk mode starts moving back to direct.
    pub transition_to_direct_mark: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            partitions: 16,
            retention: Retention::Purge,
            max_enqueued_per_sink: 1000,
            transition_to_direct_mark: 50,
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub service: ServiceConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let defaults = ServiceConfig::default();
        let partitions = parsed_var("TRACKER_PARTITIONS", defaults.partitions)?;
        if partitions == 0 {
            return Err(Error::Config(
                "TRACKER_PARTITIONS must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            service: ServiceConfig {
                partitions,
                retention: parsed_var("TRACKER_RETENTION", defaults.retention)?,
                max_enqueued_per_sink: parsed_var(
                    "TRACKER_MAX_ENQUEUED_PER_SINK",
                    defaults.max_enqueued_per_sink,
                )?,
                transition_to_direct_mark: parsed_var(
                    "TRACKER_TRANSITION_TO_DIRECT_MARK",
                    defaults.transition_to_direct_mark,
                )?,
            },
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
