use super::Job;
use crate::sender::{TransmissionError, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Delivery totals across all workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: u64,
    pub failed: u64,
}

/// A job that still failed after the transport's retries.
#[derive(Error, Debug)]
#[error("Delivery failed ({} delivered, {} failed): {source}", .report.delivered, .report.failed)]
pub struct DeliveryError {
    pub report: DeliveryReport,
    #[source]
    pub source: TransmissionError,
}

#[derive(Default)]
struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryStats {
    fn report(&self) -> DeliveryReport {
        DeliveryReport {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Spawns `n` workers draining `rx` through `transport` and waits for all of
/// them. Workers exit once the channel is closed and empty.
///
/// A job that still fails after the transport's retries stops its worker and
/// cancels `token`, so the collection loops close the channel and the other
/// workers drain what is left. The first such failure is returned.
pub async fn run_workers(
    n: usize,
    rx: mpsc::Receiver<Job>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
) -> Result<DeliveryReport, DeliveryError> {
    let rx = Arc::new(Mutex::new(rx));
    let stats = Arc::new(DeliveryStats::default());
    let mut workers = JoinSet::new();

    for id in 0..n.max(1) {
        let rx = rx.clone();
        let stats = stats.clone();
        let transport = transport.clone();
        let token = token.clone();
        workers.spawn(async move {
            loop {
                // The lock is released as soon as a job is taken.
                let job = rx.lock().await.recv().await;
                let Some(job) = job else {
                    break;
                };
                match transport.send(&job.body).await {
                    Ok(()) => {
                        stats.delivered.fetch_add(1, Ordering::Relaxed);
                        debug!(worker = id, source = ?job.source, metrics = job.metrics, "job delivered");
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            worker = id,
                            transport = transport.name(),
                            source = ?job.source,
                            error = %e,
                            "job delivery failed, stopping worker"
                        );
                        token.cancel();
                        return Err(e);
                    }
                }
            }
            debug!(worker = id, "worker stopped");
            Ok(())
        });
    }

    let mut first_failure = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                first_failure.get_or_insert(e);
            }
            Err(e) => {
                error!(error = %e, "worker task panicked");
                token.cancel();
            }
        }
    }

    let report = stats.report();
    info!(
        delivered = report.delivered,
        failed = report.failed,
        "all workers stopped"
    );
    match first_failure {
        Some(source) => Err(DeliveryError { report, source }),
        None => Ok(report),
    }
}
