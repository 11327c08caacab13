use parking_lot::Mutex;
use rask_metrics_agent::sender::{GrpcTransport, Sealer, TransmissionError, Transport};
use rask_metrics_core::compression;
use rask_metrics_core::crypto::Signer;
use rask_metrics_core::proto::metrics_server::{Metrics, MetricsServer};
use rask_metrics_core::proto::{EncryptedMessage, MetricsResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

#[derive(Debug, Clone)]
struct Received {
    blob: Vec<u8>,
    hash: Option<String>,
    real_ip: Option<String>,
    content_encoding: Option<String>,
}

/// Records every UpdateMetrics call and answers with a fixed error string.
#[derive(Default)]
struct RecordingMetrics {
    received: Arc<Mutex<Vec<Received>>>,
    reject_with: String,
}

fn metadata(request: &Request<EncryptedMessage>, key: &str) -> Option<String> {
    request
        .metadata()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tonic::async_trait]
impl Metrics for RecordingMetrics {
    async fn update_metric(
        &self,
        _request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        Err(Status::unimplemented("update_metric"))
    }

    async fn update_metrics(
        &self,
        request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        self.received.lock().push(Received {
            hash: metadata(&request, "hashsha256"),
            real_ip: metadata(&request, "x-real-ip"),
            content_encoding: metadata(&request, "content-encoding"),
            blob: request.into_inner().blob,
        });
        if self.reject_with.is_empty() {
            Ok(Response::new(MetricsResponse::ok(Vec::new())))
        } else {
            Ok(Response::new(MetricsResponse::failed(self.reject_with.clone())))
        }
    }

    async fn get_metric(
        &self,
        _request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        Err(Status::unimplemented("get_metric"))
    }

    async fn list_metrics(
        &self,
        _request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        Err(Status::unimplemented("list_metrics"))
    }

    async fn ping(
        &self,
        _request: Request<EncryptedMessage>,
    ) -> Result<Response<MetricsResponse>, Status> {
        Ok(Response::new(MetricsResponse::ok(Vec::new())))
    }
}

async fn spawn_server(service: RecordingMetrics) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(MetricsServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

const BATCH: &[u8] = br#"[{"id":"Hits","type":"counter","delta":2}]"#;

#[tokio::test]
async fn test_update_metrics_carries_blob_and_metadata() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_server(RecordingMetrics {
        received: received.clone(),
        reject_with: String::new(),
    })
    .await;

    let signer = Signer::new(b"grpc-key").unwrap();
    let transport = GrpcTransport::new(
        &addr.to_string(),
        Arc::new(Sealer::new(None, Some(signer.clone()))),
        Some("10.0.0.7".parse().unwrap()),
        Duration::from_secs(5),
    )
    .unwrap();

    transport.send(BATCH).await.unwrap();

    let calls = received.lock().clone();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.real_ip.as_deref(), Some("10.0.0.7"));
    assert_eq!(call.content_encoding.as_deref(), Some("gzip"));
    assert!(signer.verify(&call.blob, call.hash.as_deref().unwrap()));
    assert_eq!(compression::decompress(&call.blob, 1 << 20).unwrap(), BATCH);
}

#[tokio::test]
async fn test_error_field_is_reported_as_rejection() {
    let addr = spawn_server(RecordingMetrics {
        received: Arc::default(),
        reject_with: "metric Hits already stored as gauge".to_string(),
    })
    .await;

    let transport = GrpcTransport::new(
        &format!("http://{addr}"),
        Arc::new(Sealer::default()),
        None,
        Duration::from_secs(5),
    )
    .unwrap();

    let err = transport.send(BATCH).await.unwrap_err();
    assert!(err.is_retryable());
    match err {
        TransmissionError::Rejected(message) => {
            assert_eq!(message, "metric Hits already stored as gauge");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_server_is_a_retryable_grpc_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = GrpcTransport::new(
        &addr.to_string(),
        Arc::new(Sealer::default()),
        None,
        Duration::from_secs(2),
    )
    .unwrap();

    let err = transport.send(BATCH).await.unwrap_err();
    assert!(matches!(err, TransmissionError::Grpc(_)));
    assert!(err.is_retryable());
}
