use std::future::pending;

use super::TRACING_TARGET_SHUTDOWN;

/// Resolves on the first Ctrl+C or SIGTERM.
///
/// A signal whose handler cannot be installed is ignored; the other one
/// still triggers shutdown.
pub async fn shutdown_signal() {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(err) => {
                tracing::error!(target: TRACING_TARGET_SHUTDOWN, error = %err, "cannot listen for Ctrl+C");
                pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(err) => {
                tracing::error!(target: TRACING_TARGET_SHUTDOWN, error = %err, "cannot listen for SIGTERM");
                pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<&'static str>();

    let signal = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };

    tracing::info!(target: TRACING_TARGET_SHUTDOWN, signal, "shutting down gracefully");
}
