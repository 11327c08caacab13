mod router;
pub mod server;
mod state;
pub mod tracing;

pub use router::router;

use crate::config::{Cli, Command, Settings};
use crate::error::ServerError;
use crate::grpc::{self, MetricsService};
use crate::handler::AppState;
use clap::Parser;
use clap::error::ErrorKind;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Binary entry point: parses configuration, handles the healthcheck
/// subcommand, installs logging and serves until a shutdown signal.
pub async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    let settings = match Settings::resolve(&cli, |name| std::env::var(name).ok()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.command == Some(Command::Healthcheck) {
        return match crate::healthcheck(&settings.address).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = tracing::init_tracing(settings.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    ::tracing::info!(
        address = %settings.address,
        grpc_address = %settings.grpc_address,
        "Loaded settings"
    );

    let token = CancellationToken::new();
    let signals = tokio::spawn(server::listen(token.clone()));
    let result = run(settings, token).await;
    signals.abort();

    match result {
        Ok(()) => {
            ::tracing::info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            ::tracing::error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Opens storage, binds the gRPC then the HTTP listener and serves until
/// `shutdown_token` is cancelled.
pub async fn run(settings: Settings, shutdown_token: CancellationToken) -> Result<(), ServerError> {
    let grpc_address = settings.grpc_address.clone();
    let address = settings.address.clone();
    start(settings, shutdown_token, async move {
        let grpc_listener = server::bind(&grpc_address).await?;
        let http_listener = server::bind(&address).await?;
        Ok::<_, ServerError>((http_listener, grpc_listener))
    })
    .await
}

/// Like [`run`], serving on listeners the caller already bound.
pub async fn run_on(
    settings: Settings,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    shutdown_token: CancellationToken,
) -> Result<(), ServerError> {
    start(settings, shutdown_token, async move {
        Ok::<_, ServerError>((http_listener, grpc_listener))
    })
    .await
}

/// Storage comes up before any listener is bound and is closed once both
/// servers have stopped, including when binding fails.
async fn start<L>(
    settings: Settings,
    shutdown_token: CancellationToken,
    listeners: L,
) -> Result<(), ServerError>
where
    L: Future<Output = Result<(TcpListener, TcpListener), ServerError>>,
{
    let storage_token = CancellationToken::new();
    let (state, storage) = AppState::build(&settings, storage_token.clone()).await?;

    let served = match listeners.await {
        Ok((http_listener, grpc_listener)) => {
            let service = MetricsService::new(state.provider.clone(), state.pipeline.clone());
            server::serve(
                http_listener,
                router(state),
                |stop| grpc::serve(grpc_listener, service, stop),
                shutdown_token,
                settings.shutdown_timeout,
            )
            .await
        }
        Err(e) => Err(e),
    };

    storage_token.cancel();
    let closed = storage.shutdown().await.map_err(ServerError::from);
    served.and(closed)
}
