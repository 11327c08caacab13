//! Handlers for the metric routes. Bodies arrive already verified, decrypted
//! and inflated by the pipeline layer.

use super::AppState;
use crate::error::ApiError;
use crate::provider::{self, render_summary};
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use rask_metrics_core::{Metric, MetricKind, MetricQuery};
use serde::Serialize;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

fn json<T: Serialize>(value: &T) -> Result<Response, ApiError> {
    let body = provider::encode(value)?;
    Ok(([(CONTENT_TYPE, JSON)], body).into_response())
}

/// Handler for POST /update/{kind}/{id}/{value}
pub async fn update_positional(
    State(state): State<AppState>,
    Path((kind, id, raw)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let metric = Metric::parse(&kind, &id, &raw)?;
    let stored = state.provider.update_metric(metric).await?;
    Ok(([(CONTENT_TYPE, TEXT)], stored.render_value()).into_response())
}

/// Handler for POST /update/
pub async fn update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let metric: Metric = provider::decode(&body)?;
    let stored = state.provider.update_metric(metric).await?;
    json(&stored)
}

/// Handler for POST /updates/
pub async fn update_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let metrics: Vec<Metric> = provider::decode(&body)?;
    let stored = state.provider.update_metrics(metrics).await?;
    json(&stored)
}

/// Handler for GET /value/{kind}/{id}
pub async fn value_positional(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let metric = state.provider.get_metric(MetricQuery { id, kind }).await?;
    Ok(([(CONTENT_TYPE, TEXT)], metric.render_value()).into_response())
}

/// Handler for POST /value/
pub async fn value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let query: MetricQuery = provider::decode(&body)?;
    let metric = state.provider.get_metric(query).await?;
    json(&metric)
}

/// Handler for GET /
pub async fn summary(State(state): State<AppState>) -> Result<Response, ApiError> {
    let metrics = state.provider.list_metrics().await?;
    Ok(([(CONTENT_TYPE, TEXT)], render_summary(&metrics)).into_response())
}

/// Handler for GET /updates/, the HTTP counterpart of `ListMetrics`.
pub async fn list(State(state): State<AppState>) -> Result<Response, ApiError> {
    let metrics = state.provider.list_metrics().await?;
    json(&metrics)
}
