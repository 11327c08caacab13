//! tonic implementation of the `metrics.Metrics` service.
//!
//! Every call runs the same pipeline stages as the HTTP surface. Pipeline
//! rejections become a `Status`; provider failures are reported in the
//! response `error` field with an empty blob.

use crate::error::ServerError;
use crate::middleware::{Pipeline, grpc as adapter};
use crate::provider::{Provider, ProviderError, decode, encode};
use rask_metrics_core::proto::metrics_server::{Metrics, MetricsServer};
use rask_metrics_core::proto::{EncryptedMessage, MetricsResponse};
use rask_metrics_core::{Metric, MetricQuery};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

#[derive(Clone)]
pub struct MetricsService {
    provider: Arc<Provider>,
    pipeline: Arc<Pipeline>,
}

impl MetricsService {
    pub fn new(provider: Arc<Provider>, pipeline: Arc<Pipeline>) -> Self {
        Self { provider, pipeline }
    }

    /// Runs request stages, the operation, then response stages.
    async fn handle<F, Fut>(
        &self,
        rpc: &'static str,
        request: Request<EncryptedMessage>,
        op: F,
    ) -> Result<Response<MetricsResponse>, Status>
    where
        F: FnOnce(Arc<Provider>, Vec<u8>) -> Fut,
        Fut: Future<Output = Result<Vec<u8>, ProviderError>>,
    {
        let mut processed = self.pipeline.process_request(adapter::inbound(request))?;
        let body = std::mem::take(&mut processed.body);

        match op(self.provider.clone(), body).await {
            Ok(blob) => {
                let outbound = self.pipeline.finish_response(&processed, blob)?;
                adapter::respond(outbound, String::new())
            }
            Err(e) => {
                debug!(rpc, error = %e, "rpc failed");
                Ok(Response::new(MetricsResponse::failed(e.to_string())))
            }
        }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn update_metric(
        &self,
        request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        self.handle("UpdateMetric", request, |provider, body| async move {
            let metric: Metric = decode(&body)?;
            encode(&provider.update_metric(metric).await?)
        })
        .await
    }

    async fn update_metrics(
        &self,
        request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        self.handle("UpdateMetrics", request, |provider, body| async move {
            let metrics: Vec<Metric> = decode(&body)?;
            encode(&provider.update_metrics(metrics).await?)
        })
        .await
    }

    async fn get_metric(
        &self,
        request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        self.handle("GetMetric", request, |provider, body| async move {
            let query: MetricQuery = decode(&body)?;
            encode(&provider.get_metric(query).await?)
        })
        .await
    }

    async fn list_metrics(
        &self,
        request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        self.handle("ListMetrics", request, |provider, _| async move {
            encode(&provider.list_metrics().await?)
        })
        .await
    }

    async fn ping(
        &self,
        request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        self.handle("Ping", request, |provider, _| async move {
            provider.ping().await.map(|()| Vec::new())
        })
        .await
    }
}

/// Serves the service on an already bound listener until `shutdown` fires.
/// In-flight calls are allowed to finish.
pub async fn serve(
    listener: TcpListener,
    service: MetricsService,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    info!(address = ?listener.local_addr().ok(), "gRPC server listening");
    tonic::transport::Server::builder()
        .add_service(MetricsServer::new(service))
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            shutdown.cancelled_owned(),
        )
        .await?;
    info!("gRPC server stopped");
    Ok(())
}
