//! OS signal handling.
//!
//! SIGINT and SIGTERM both translate into a graceful stop: ingestion halts,
//! admitted records drain, then the process exits.

use crate::lifecycle::shutdown::Shutdown;

/// Wait for SIGINT/SIGTERM and trigger `shutdown`.
pub async fn trigger_on_signal(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, stopping ingestion"),
        _ = terminate => tracing::info!("Received SIGTERM, stopping ingestion"),
    }

    shutdown.trigger();
}
