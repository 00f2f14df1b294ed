//! Service error types.

use broker::BrokerError;
use message_bus::ConfigurationError;
use thiserror::Error;

/// Errors raised while starting or running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// An environment variable held a value that does not parse.
    #[error("Invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },

    /// Logging or metrics could not be installed.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
