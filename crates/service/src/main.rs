//! Allocation service entry point.

use service::telemetry::{init_tracing, install_metrics};
use service::{Application, Config, ServiceError};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env()?;
    init_tracing(&config)?;

    // 2. Install Prometheus exporter if requested
    if let Some(addr) = config.metrics_addr {
        install_metrics(addr)?;
    }

    // 3. Wire the bus, broker and handlers
    let mut app = Application::build(config)?;

    // 4. Listen for external commands
    app.start().await?;
    tracing::info!(
        service = %app.config().service_title,
        listeners = app.listener_count(),
        "service started"
    );

    shutdown_signal().await;
    app.shutdown().await;
    Ok(())
}
