//! Service configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use message_bus::{AppContext, RetryPolicy};

use crate::error::ServiceError;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SERVICE_NAME` (default: `"allocation"`)
/// - `SERVICE_TITLE` (default: `"Allocation Service"`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` `pretty` or `json` (default: `pretty`)
/// - `ALLOW_EXTERNAL_EVENT` consume commands from the broker (default: `false`)
/// - `RETRY_ATTEMPTS` attempts per event handler (default: `3`)
/// - `RETRY_INITIAL_BACKOFF_MS` wait after the first failure (default: `1000`)
/// - `RETRY_MAX_BACKOFF_MS` cap on the wait (default: `10000`)
/// - `METRICS_ADDR` Prometheus listen address (default: unset, no exporter)
/// - `PUBSUB_CAPACITY` per-channel buffer (default: `256`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub service_name: String,
    pub service_title: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub allow_external_event: bool,
    pub retry_attempts: u32,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub metrics_addr: Option<SocketAddr>,
    pub pubsub_capacity: usize,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset or empty variables. Values that are set but do not parse are
    /// an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            service_name: var("SERVICE_NAME").unwrap_or(defaults.service_name),
            service_title: var("SERVICE_TITLE").unwrap_or(defaults.service_title),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&var, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
            allow_external_event: flag(&var, "ALLOW_EXTERNAL_EVENT")?
                .unwrap_or(defaults.allow_external_event),
            retry_attempts: parse(&var, "RETRY_ATTEMPTS")?.unwrap_or(defaults.retry_attempts),
            retry_initial_backoff: parse(&var, "RETRY_INITIAL_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_initial_backoff),
            retry_max_backoff: parse(&var, "RETRY_MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_backoff),
            metrics_addr: parse(&var, "METRICS_ADDR")?,
            pubsub_capacity: parse(&var, "PUBSUB_CAPACITY")?.unwrap_or(defaults.pubsub_capacity),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_initial_backoff)
            .with_max_backoff(self.retry_max_backoff)
    }

    pub fn app_context(&self) -> AppContext {
        AppContext {
            name: self.service_name.clone(),
            title: self.service_title.clone(),
            allow_external_event: self.allow_external_event,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "allocation".to_string(),
            service_title: "Allocation Service".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            allow_external_event: false,
            retry_attempts: 3,
            retry_initial_backoff: Duration::from_millis(1000),
            retry_max_backoff: Duration::from_millis(10_000),
            metrics_addr: None,
            pubsub_capacity: broker::memory::DEFAULT_CAPACITY,
        }
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ServiceError> {
    var(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ServiceError::InvalidConfig { key, value })
        })
        .transpose()
}

fn flag(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ServiceError> {
    var(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ServiceError::InvalidConfig { key, value }),
        })
        .transpose()
}
