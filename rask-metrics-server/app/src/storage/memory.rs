use super::{MetricStore, Storage, StorageError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rask_metrics_core::{Metric, MetricKind};

/// Volatile backend: one mutex over the metric maps.
#[derive(Debug, Default)]
pub struct MemStorage {
    state: Mutex<MetricStore>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn append_metric(&self, metric: Metric) -> Result<Metric, StorageError> {
        self.state.lock().apply(&metric)
    }

    async fn append_metrics(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>, StorageError> {
        self.state.lock().apply_batch(&metrics)
    }

    async fn get_metric(
        &self,
        id: &str,
        kind: MetricKind,
    ) -> Result<Option<Metric>, StorageError> {
        Ok(self.state.lock().get(id, kind))
    }

    async fn get_all_metrics(&self) -> Result<Vec<Metric>, StorageError> {
        Ok(self.state.lock().all())
    }

    async fn check_connection(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
