use super::config::{Config, ConfigError, Protocol};
use crate::collector::{
    Collector, CollectorError, DeliveryError, DeliveryReport, Sampler, SystemProbe, job_channel,
    run_workers,
};
use crate::sender::{
    GrpcTransport, HttpTransport, ReliableTransport, Sealer, TransmissionError, Transport,
};
use rask_metrics_core::crypto::{CryptoError, PublicKey, Signer};
use rask_metrics_core::net::advertised_ip;
use rask_metrics_core::retry::Backoff;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Key setup failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Transport setup failed: {0}")]
    Transport(#[from] TransmissionError),
    #[error("Collector failed: {0}")]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Owns the agent's tasks: the sampler loop, the two collection loops and the
/// worker pool, all tied to one cancellation token.
pub struct ServiceManager {
    config: Config,
    sampler: Arc<Sampler>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
}

impl ServiceManager {
    /// Loads keys and builds the configured transport. Must be called inside a
    /// Tokio runtime (the gRPC channel spawns its connection worker).
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let public_key = config
            .crypto_key
            .as_ref()
            .map(|path| PublicKey::from_pem_file(path, config.padding))
            .transpose()?;
        let signer = config.signing_key().map(Signer::new).transpose()?;
        if public_key.is_some() {
            info!(padding = %config.padding, "payload encryption enabled");
        }
        if signer.is_some() {
            info!("payload signing enabled");
        }
        let sealer = Arc::new(Sealer::new(public_key, signer));

        let transport: Arc<dyn Transport> = match config.protocol {
            Protocol::Http => {
                let real_ip = local_ip(&config, &host_port(&config.base_url()));
                Arc::new(HttpTransport::new(
                    &config.base_url(),
                    sealer,
                    real_ip,
                    config.request_timeout,
                )?)
            }
            Protocol::Grpc => {
                let real_ip = local_ip(&config, &config.grpc_address);
                Arc::new(GrpcTransport::new(
                    &config.grpc_address,
                    sealer,
                    real_ip,
                    config.request_timeout,
                )?)
            }
        };

        Ok(Self::with_transport(config, transport))
    }

    /// Uses a caller-provided transport instead of building one from config.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            sampler: Arc::new(Sampler::new()),
            transport,
            token: CancellationToken::new(),
        }
    }

    /// Token that stops the agent when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs until the shutdown token is cancelled, a collection loop fails or
    /// a job still fails after retries, then drains queued jobs and reports
    /// delivery totals.
    pub async fn run(self) -> Result<DeliveryReport, ServiceError> {
        let ServiceManager {
            config,
            sampler,
            transport,
            token,
        } = self;

        info!(
            protocol = ?config.protocol,
            address = %config.address,
            poll_interval_secs = config.poll_interval.as_secs(),
            report_interval_secs = config.report_interval.as_secs(),
            workers = config.rate_limit,
            "starting rask-metrics-agent v{}",
            crate::VERSION
        );

        let sampler_task = {
            let sampler = sampler.clone();
            let token = token.clone();
            let poll_interval = config.poll_interval;
            tokio::spawn(async move { sampler.start(poll_interval, token).await })
        };

        let (tx, rx) = job_channel(config.rate_limit);
        let collector = Collector::new(sampler, SystemProbe::new(), config.report_interval);
        let collector_task = tokio::spawn(collector.collect(tx, token.clone()));

        let reliable: Arc<dyn Transport> = Arc::new(ReliableTransport::new(
            transport,
            Backoff::standard(),
            token.clone(),
        ));
        let workers_task = tokio::spawn(run_workers(
            config.rate_limit,
            rx,
            reliable,
            token.clone(),
        ));

        let collected = collector_task.await;
        // Whatever ended the collector, everything else stops too.
        token.cancel();

        let delivered = match workers_task.await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(error = %e, "worker pool task failed");
                Ok(DeliveryReport::default())
            }
        };
        if let Err(e) = sampler_task.await {
            warn!(error = %e, "sampler task failed");
        }

        collected.map_err(CollectorError::from)??;
        let report = delivered?;
        info!(
            delivered = report.delivered,
            failed = report.failed,
            "rask-metrics-agent stopped"
        );
        Ok(report)
    }
}

fn host_port(base_url: &str) -> String {
    match url::Url::parse(base_url) {
        Ok(url) => match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            _ => base_url.to_string(),
        },
        Err(_) => base_url.to_string(),
    }
}

fn local_ip(config: &Config, remote: &str) -> Option<IpAddr> {
    match advertised_ip(remote, config.trusted_subnet.as_ref()) {
        Ok(ip) => {
            info!(%ip, "advertising source address");
            Some(ip)
        }
        Err(e) => {
            warn!(remote, error = %e, "cannot determine local address, X-Real-IP will be omitted");
            None
        }
    }
}
