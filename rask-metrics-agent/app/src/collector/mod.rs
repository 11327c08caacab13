pub mod runtime;
pub mod sampler;
pub mod system;
pub mod worker;

use rask_metrics_core::{Metric, MetricError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

pub use sampler::Sampler;
pub use system::SystemProbe;
pub use worker::{DeliveryError, DeliveryReport, run_workers};

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Invalid metric in batch: {0}")]
    InvalidMetric(#[from] MetricError),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Collector task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Which collection loop produced a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSource {
    Runtime,
    System,
}

/// One serialized batch waiting for delivery.
#[derive(Debug, Clone)]
pub struct Job {
    pub source: JobSource,
    pub metrics: usize,
    pub body: Vec<u8>,
}

/// Bounded job channel sized to the worker count, so a stalled worker pool
/// holds back the collection loops.
pub fn job_channel(workers: usize) -> (mpsc::Sender<Job>, mpsc::Receiver<Job>) {
    mpsc::channel(workers.max(1))
}

/// Serializes a batch as a JSON array of metrics.
pub fn encode_batch(metrics: &[Metric]) -> Result<Vec<u8>, CollectorError> {
    for metric in metrics {
        metric.validate()?;
    }
    Ok(serde_json::to_vec(metrics)?)
}

/// Turns sampler snapshots and host probes into jobs at the report interval.
pub struct Collector {
    sampler: Arc<Sampler>,
    probe: SystemProbe,
    report_interval: Duration,
}

impl Collector {
    pub fn new(sampler: Arc<Sampler>, probe: SystemProbe, report_interval: Duration) -> Self {
        Self {
            sampler,
            probe,
            report_interval,
        }
    }

    /// Runs the runtime and host loops until `token` is cancelled. Both loops
    /// own a sender, so the channel closes once `collect` returns.
    ///
    /// A batch that fails to serialize cancels `token` and is returned as the error.
    pub async fn collect(
        self,
        tx: mpsc::Sender<Job>,
        token: CancellationToken,
    ) -> Result<(), CollectorError> {
        let Collector {
            sampler,
            mut probe,
            report_interval,
        } = self;

        let runtime_loop = report_loop(
            JobSource::Runtime,
            report_interval,
            tx.clone(),
            token.clone(),
            move || sampler.snapshot(),
        );
        let system_loop = report_loop(
            JobSource::System,
            report_interval,
            tx,
            token.clone(),
            move || probe.poll(),
        );

        tokio::try_join!(runtime_loop, system_loop)?;
        tracing::info!("collector stopped");
        Ok(())
    }
}

async fn report_loop<F>(
    source: JobSource,
    period: Duration,
    tx: mpsc::Sender<Job>,
    token: CancellationToken,
    mut produce: F,
) -> Result<(), CollectorError>
where
    F: FnMut() -> Vec<Metric>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let metrics = produce();
        if metrics.is_empty() {
            continue;
        }
        let body = match encode_batch(&metrics) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(?source, error = %e, "batch serialization failed, stopping agent");
                token.cancel();
                return Err(e);
            }
        };
        let job = Job {
            source,
            metrics: metrics.len(),
            body,
        };

        // Blocks while every worker is busy and the channel is full.
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            sent = tx.send(job) => {
                if sent.is_err() {
                    tracing::warn!(?source, "job channel closed, stopping loop");
                    return Ok(());
                }
            }
        }
    }
}
