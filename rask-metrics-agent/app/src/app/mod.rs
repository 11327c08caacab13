pub mod config;
pub mod logging_system;
pub mod service;
pub mod shutdown;

pub use config::{Cli, Config, ConfigError, LogLevel, Protocol};
pub use logging_system::{LoggingError, LoggingSystem};
pub use service::{ServiceError, ServiceManager};

use clap::Parser;
use clap::error::ErrorKind;
use std::process::ExitCode;
use tracing::{error, info};

/// Parses configuration, installs logging and runs the agent until a
/// shutdown signal arrives.
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

    let config = match Config::resolve(&cli, |name| std::env::var(name).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = LoggingSystem::from_env(config.log_level).initialize() {
        eprintln!("Logging setup failed: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Agent error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let manager = ServiceManager::new(config)?;
    let token = manager.shutdown_token();
    let signals = tokio::spawn(shutdown::listen(token));

    let report = manager.run().await?;
    signals.abort();
    info!(
        delivered = report.delivered,
        failed = report.failed,
        "shutdown complete"
    );
    Ok(())
}
