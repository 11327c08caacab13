use super::runtime::RuntimeProbe;
use parking_lot::Mutex;
use rand::Rng;
use rask_metrics_core::Metric;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

struct SamplerState {
    probe: RuntimeProbe,
    gauges: BTreeMap<&'static str, f64>,
    poll_count: i64,
    /// Polls not yet handed out by [`Sampler::snapshot`].
    unreported_polls: i64,
}

/// Runtime sampler. All state sits behind one lock so a snapshot never
/// observes a half-finished poll.
pub struct Sampler {
    state: Mutex<SamplerState>,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SamplerState {
                probe: RuntimeProbe::new(),
                gauges: BTreeMap::new(),
                poll_count: 0,
                unreported_polls: 0,
            }),
        }
    }

    /// Refreshes every runtime gauge and `RandomValue`, then bumps `PollCount`.
    pub fn poll(&self) {
        let mut state = self.state.lock();
        let readings = state.probe.read();
        state.gauges.extend(readings);
        state
            .gauges
            .insert(RANDOM_VALUE, rand::rng().random_range(0.0..100.0));
        state.poll_count += 1;
        state.unreported_polls += 1;
    }

    /// Copies the current gauges and hands out the polls counted since the
    /// previous snapshot as the `PollCount` delta.
    ///
    /// The delta is handed out once. If its batch then fails delivery after
    /// retries, the increment is lost along with the agent run that the
    /// failure stops.
    pub fn snapshot(&self) -> Vec<Metric> {
        let mut state = self.state.lock();
        let mut metrics: Vec<Metric> = state
            .gauges
            .iter()
            .map(|(name, value)| Metric::gauge(*name, *value))
            .collect();
        if state.unreported_polls > 0 {
            metrics.push(Metric::counter(POLL_COUNT, state.unreported_polls));
            state.unreported_polls = 0;
        }
        metrics
    }

    /// Total polls since start.
    pub fn poll_count(&self) -> i64 {
        self.state.lock().poll_count
    }

    /// Polls every `poll_interval` until `token` is cancelled.
    pub async fn start(&self, poll_interval: Duration, token: CancellationToken) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => self.poll(),
            }
        }
        tracing::debug!(polls = self.poll_count(), "sampler stopped");
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
