//! Client side of the `healthcheck` subcommand.
//!
//! `GET /ping` answers 200 only while storage accepts connections, so a
//! passing probe means the process is serving and can reach its backend.

use std::time::Duration;
use thiserror::Error;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum HealthcheckError {
    #[error("Cannot reach server at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Server at {url} reports unhealthy storage (HTTP {status})")]
    Unhealthy { url: String, status: u16 },
}

/// Probes the server listening on `address`. Wildcard hosts are probed on
/// loopback.
pub async fn healthcheck(address: &str) -> Result<(), HealthcheckError> {
    let target = match address.rsplit_once(':') {
        Some(("0.0.0.0" | "" | "[::]", port)) => format!("127.0.0.1:{port}"),
        _ => address.to_string(),
    };
    ping(format!("http://{target}/ping")).await
}

pub async fn healthcheck_with_port(port: u16) -> Result<(), HealthcheckError> {
    ping(format!("http://127.0.0.1:{port}/ping")).await
}

async fn ping(url: String) -> Result<(), HealthcheckError> {
    let response = match reqwest::Client::new()
        .get(&url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response,
        Err(source) => return Err(HealthcheckError::Unreachable { url, source }),
    };

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(HealthcheckError::Unhealthy {
            url,
            status: status.as_u16(),
        })
    }
}
