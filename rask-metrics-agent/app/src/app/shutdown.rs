use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Waits for SIGINT (Ctrl+C) or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Cancels `token` on the first shutdown signal. Returns early, without
/// cancelling, if the token is cancelled elsewhere first.
pub async fn listen(token: CancellationToken) {
    tokio::select! {
        () = wait_for_signal() => token.cancel(),
        () = token.cancelled() => {}
    }
}
