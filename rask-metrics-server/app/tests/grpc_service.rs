use rask_metrics_core::crypto::{PrivateKey, PublicKey, Signer};
use rask_metrics_core::proto::EncryptedMessage;
use rask_metrics_core::proto::metrics_client::MetricsClient;
use rask_metrics_core::{Metric, compression};
use rask_metrics_server::grpc::{self, MetricsService};
use rask_metrics_server::middleware::Pipeline;
use rask_metrics_server::provider::Provider;
use rask_metrics_server::storage::MemStorage;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;

const KEY: &[u8] = b"grpc-secret";

struct Harness {
    client: MetricsClient<Channel>,
    public: PublicKey,
    signer: Signer,
    stop: CancellationToken,
}

async fn start(pipeline: impl FnOnce(PrivateKey, Signer) -> Pipeline) -> Harness {
    let private =
        PrivateKey::from_pem(include_str!("fixtures/private.pem"), Default::default()).unwrap();
    let public = private.public_key();
    let signer = Signer::new(KEY).unwrap();

    let provider = Arc::new(Provider::new(Arc::new(MemStorage::new())));
    let service = MetricsService::new(provider, Arc::new(pipeline(private, signer.clone())));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let stop = CancellationToken::new();
    tokio::spawn(grpc::serve(listener, service, stop.clone()));

    let client = MetricsClient::connect(format!("http://{address}")).await.unwrap();
    Harness {
        client,
        public,
        signer,
        stop,
    }
}

impl Harness {
    /// Gzips, encrypts and signs `body` the way the agent does.
    fn sealed(&self, body: &[u8], real_ip: &'static str) -> tonic::Request<EncryptedMessage> {
        let wire = self
            .public
            .encrypt(&compression::compress(body).unwrap())
            .unwrap();
        let signature = self.signer.sign(&wire);
        let mut request = tonic::Request::new(EncryptedMessage { blob: wire });
        let metadata = request.metadata_mut();
        metadata.insert("content-encoding", MetadataValue::from_static("gzip"));
        metadata.insert("x-real-ip", MetadataValue::from_static(real_ip));
        metadata.insert("hashsha256", signature.parse().unwrap());
        request
    }
}

fn full_pipeline(private: PrivateKey, signer: Signer) -> Pipeline {
    Pipeline::build(
        Some("127.0.0.0/8".parse().unwrap()),
        Some(signer),
        Some(private),
        1 << 20,
    )
}

#[tokio::test]
async fn test_update_metrics_then_get_and_list() {
    let mut harness = start(full_pipeline).await;

    let batch = br#"[{"id":"Alloc","type":"gauge","value":42.5},{"id":"PollCount","type":"counter","delta":5}]"#;
    let request = harness.sealed(batch, "127.0.0.1");
    let response = harness.client.update_metrics(request).await.unwrap();

    let signature = response
        .metadata()
        .get("hashsha256")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let message = response.into_inner();
    assert!(message.error.is_empty());
    assert!(harness.signer.verify(&message.blob, &signature));
    let stored: Vec<Metric> = serde_json::from_slice(&message.blob).unwrap();
    assert_eq!(
        stored,
        vec![Metric::gauge("Alloc", 42.5), Metric::counter("PollCount", 5)]
    );

    let request = harness.sealed(br#"{"id":"PollCount","type":"counter"}"#, "127.0.0.1");
    let message = harness.client.get_metric(request).await.unwrap().into_inner();
    let metric: Metric = serde_json::from_slice(&message.blob).unwrap();
    assert_eq!(metric, Metric::counter("PollCount", 5));

    let request = harness.sealed(b"", "127.0.0.1");
    let message = harness.client.list_metrics(request).await.unwrap().into_inner();
    let all: Vec<Metric> = serde_json::from_slice(&message.blob).unwrap();
    assert_eq!(all.len(), 2);

    harness.stop.cancel();
}

#[tokio::test]
async fn test_provider_errors_travel_in_error_field() {
    let mut harness = start(full_pipeline).await;

    let request = harness.sealed(br#"{"id":"Nope","type":"gauge"}"#, "127.0.0.1");
    let message = harness.client.get_metric(request).await.unwrap().into_inner();
    assert!(message.blob.is_empty());
    assert!(message.error.contains("Nope"));

    let request = harness.sealed(b"[{", "127.0.0.1");
    let message = harness.client.update_metrics(request).await.unwrap().into_inner();
    assert!(!message.error.is_empty());

    harness.stop.cancel();
}

#[tokio::test]
async fn test_pipeline_rejections_become_status() {
    let mut harness = start(full_pipeline).await;

    let request = harness.sealed(b"[]", "192.168.1.1");
    let status = harness.client.update_metrics(request).await.unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let mut request = harness.sealed(b"[]", "127.0.0.1");
    request
        .metadata_mut()
        .insert("hashsha256", MetadataValue::from_static("forged"));
    let status = harness.client.update_metrics(request).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    harness.stop.cancel();
}

#[tokio::test]
async fn test_ping_without_stages() {
    let mut harness = start(|_, _| Pipeline::new()).await;
    let message = harness
        .client
        .ping(EncryptedMessage::default())
        .await
        .unwrap()
        .into_inner();
    assert!(message.error.is_empty());
    harness.stop.cancel();
}
