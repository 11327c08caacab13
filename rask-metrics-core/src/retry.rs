//! Fixed-schedule retry used by the agent's transports and the server's database layer.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub unit: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::standard()
    }
}

impl Backoff {
    /// Three attempts waiting 1s, 3s and 5s after each retryable failure.
    pub const fn standard() -> Self {
        Self {
            max_attempts: 3,
            unit: Duration::from_secs(1),
        }
    }

    pub const fn new(max_attempts: u32, unit: Duration) -> Self {
        Self { max_attempts, unit }
    }

    /// Wait after the failed attempt `attempt` (0-based): `unit * (2 * attempt + 1)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.unit
            .saturating_mul(attempt.saturating_mul(2).saturating_add(1))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. A retryable failure always sleeps its slot, the last one
/// included; cancellation cuts a sleep short and returns the latest error.
pub async fn retry<T, E, F, Fut>(
    backoff: Backoff,
    cancel: Option<&CancellationToken>,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = backoff.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !is_retryable(&err) {
            return Err(err);
        }

        let delay = backoff.delay_for_attempt(attempt);
        tracing::warn!(
            attempt = attempt + 1,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable failure"
        );

        match cancel {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => return Err(err),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }

        attempt += 1;
        if attempt >= attempts {
            return Err(err);
        }
    }
}
