use super::{SendFuture, Transport};
use rask_metrics_core::retry::{Backoff, retry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wraps a transport with the standard 1s/3s/5s retry schedule.
///
/// Waits between attempts end early once `cancel` fires, so shutdown is
/// never held up by more than one in-flight attempt.
#[derive(Clone)]
pub struct ReliableTransport {
    inner: Arc<dyn Transport>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl ReliableTransport {
    pub fn new(inner: Arc<dyn Transport>, backoff: Backoff, cancel: CancellationToken) -> Self {
        Self {
            inner,
            backoff,
            cancel,
        }
    }
}

impl Transport for ReliableTransport {
    fn send<'a>(&'a self, body: &'a [u8]) -> SendFuture<'a> {
        Box::pin(retry(
            self.backoff,
            Some(&self.cancel),
            |e: &super::TransmissionError| e.is_retryable(),
            move || self.inner.send(body),
        ))
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
