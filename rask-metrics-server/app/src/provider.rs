//! Surface-independent operations shared by the HTTP handlers and the gRPC
//! service.

use crate::storage::{Storage, StorageError};
use rask_metrics_core::{Metric, MetricError, MetricKind, MetricQuery};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error(transparent)]
    Invalid(#[from] MetricError),
    #[error("Malformed payload: {0}")]
    Payload(serde_json::Error),
    #[error("Failed to encode response: {0}")]
    Encode(serde_json::Error),
    #[error("Metric {id} of kind {kind} not found")]
    NotFound { id: String, kind: MetricKind },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct Provider {
    storage: Arc<dyn Storage>,
}

impl Provider {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Stores one metric and returns the state read back from storage.
    pub async fn update_metric(&self, metric: Metric) -> Result<Metric, ProviderError> {
        metric.validate()?;
        let stored = self.storage.append_metric(metric.normalized()).await?;
        debug!(id = %stored.id, kind = %stored.kind, "metric updated");
        Ok(stored)
    }

    /// Stores a batch atomically; the result follows input order.
    pub async fn update_metrics(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>, ProviderError> {
        if metrics.is_empty() {
            return Ok(Vec::new());
        }
        for metric in &metrics {
            metric.validate()?;
        }
        let metrics: Vec<Metric> = metrics.into_iter().map(Metric::normalized).collect();
        let stored = self.storage.append_metrics(metrics).await?;
        debug!(count = stored.len(), "batch updated");
        Ok(stored)
    }

    pub async fn get_metric(&self, query: MetricQuery) -> Result<Metric, ProviderError> {
        if query.id.is_empty() {
            return Err(MetricError::EmptyId.into());
        }
        self.storage
            .get_metric(&query.id, query.kind)
            .await?
            .ok_or(ProviderError::NotFound {
                id: query.id,
                kind: query.kind,
            })
    }

    pub async fn list_metrics(&self) -> Result<Vec<Metric>, ProviderError> {
        Ok(self.storage.get_all_metrics().await?)
    }

    pub async fn ping(&self) -> Result<(), ProviderError> {
        Ok(self.storage.check_connection().await?)
    }
}

/// Decodes a JSON request body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(ProviderError::Payload)
}

/// Encodes a JSON response body.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProviderError> {
    serde_json::to_vec(value).map_err(ProviderError::Encode)
}

/// `id value` pairs joined by `", "`, as served on `GET /`.
pub fn render_summary(metrics: &[Metric]) -> String {
    metrics
        .iter()
        .map(|m| format!("{} {}", m.id, m.render_value()))
        .collect::<Vec<_>>()
        .join(", ")
}
