//! Logging and metrics installation.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::error::ServiceError;

/// Installs the global tracing subscriber.
///
/// The filter comes from `config.log_level` (a `RUST_LOG` directive) and
/// falls back to `info` if it does not parse.
pub fn init_tracing(config: &Config) -> Result<(), ServiceError> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    result.map_err(|e| ServiceError::Telemetry(e.to_string()))
}

/// Installs the Prometheus recorder and serves it over HTTP on `addr`.
///
/// Must be called from within the tokio runtime.
pub fn install_metrics(addr: SocketAddr) -> Result<(), ServiceError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ServiceError::Telemetry(e.to_string()))?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
