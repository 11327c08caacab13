use crate::error::ServerError;
use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Binds a listener, naming the address on failure.
pub async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::Bind {
            address: address.to_string(),
            source: e,
        })
}

/// Runs the HTTP server and the gRPC server started by `grpc` until
/// `shutdown_token` is cancelled. `grpc` receives the token that stops it.
///
/// Either server ending, cleanly or not, cancels the token so the other one
/// follows. HTTP drains first, then gRPC is stopped; each gets
/// `shutdown_timeout` before its task is aborted.
pub async fn serve<G, F>(
    http_listener: TcpListener,
    app: Router,
    grpc: G,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
) -> Result<(), ServerError>
where
    G: FnOnce(CancellationToken) -> F,
    F: Future<Output = Result<(), ServerError>> + Send + 'static,
{
    info!(address = ?http_listener.local_addr().ok(), "HTTP server listening");

    let grpc_stop = CancellationToken::new();
    let grpc_handle = {
        let guard = shutdown_token.clone().drop_guard();
        let server = grpc(grpc_stop.clone());
        tokio::spawn(async move {
            let _guard = guard;
            server.await
        })
    };

    let http_handle = {
        let guard = shutdown_token.clone().drop_guard();
        let drain = shutdown_token.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let result = axum::serve(http_listener, app)
                .with_graceful_shutdown(drain.cancelled_owned())
                .await
                .map_err(ServerError::from);
            info!("HTTP server stopped");
            result
        })
    };

    shutdown_token.cancelled().await;
    info!("Shutting down servers");

    let http_result = finish("http", http_handle, shutdown_timeout).await;
    grpc_stop.cancel();
    let grpc_result = finish("grpc", grpc_handle, shutdown_timeout).await;

    http_result.and(grpc_result)
}

async fn finish(
    name: &'static str,
    mut handle: JoinHandle<Result<(), ServerError>>,
    timeout: Duration,
) -> Result<(), ServerError> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ServerError::Task(format!("{name} server task failed: {e}"))),
        Err(_) => {
            warn!(
                server = name,
                timeout_secs = timeout.as_secs(),
                "graceful shutdown timed out, aborting"
            );
            handle.abort();
            Ok(())
        }
    }
}

/// Cancels `token` on SIGINT or SIGTERM, or returns once it is cancelled
/// elsewhere.
pub async fn listen(token: CancellationToken) {
    tokio::select! {
        () = shutdown_signal() => token.cancel(),
        () = token.cancelled() => {}
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
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
                error!("Failed to install SIGTERM handler: {}", e);
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
