use super::{Sealer, SendFuture, TransmissionError, Transport};
use rask_metrics_core::proto::EncryptedMessage;
use rask_metrics_core::proto::metrics_client::MetricsClient;
use rask_metrics_core::{GZIP, HASH_KEY, REAL_IP_KEY};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::{AsciiMetadataValue, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Calls `Metrics.UpdateMetrics` with the sealed batch as the message blob.
///
/// The channel connects lazily, so construction succeeds while the server is
/// still down and the first send reports the connection failure.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    sealer: Arc<Sealer>,
    real_ip: Option<IpAddr>,
}

impl GrpcTransport {
    pub fn new(
        address: &str,
        sealer: Arc<Sealer>,
        real_ip: Option<IpAddr>,
        timeout: Duration,
    ) -> Result<Self, TransmissionError> {
        let uri = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| TransmissionError::InvalidEndpoint(format!("{address}: {e}")))?
            .timeout(timeout)
            .connect_timeout(timeout)
            .connect_lazy();
        Ok(Self {
            client: MetricsClient::new(channel),
            sealer,
            real_ip,
        })
    }

    fn ascii(value: &str, what: &str) -> Result<AsciiMetadataValue, TransmissionError> {
        AsciiMetadataValue::try_from(value)
            .map_err(|e| TransmissionError::InvalidHeaderValue(format!("Invalid {what}: {e}")))
    }

    async fn deliver(&self, body: &[u8]) -> Result<(), TransmissionError> {
        let sealed = self.sealer.seal(body)?;
        let bytes_sent = sealed.bytes.len();

        let mut request = tonic::Request::new(EncryptedMessage { blob: sealed.bytes });
        let metadata = request.metadata_mut();
        metadata.insert("content-encoding", MetadataValue::from_static(GZIP));
        metadata.insert("accept-encoding", MetadataValue::from_static(GZIP));
        if let Some(signature) = &sealed.signature {
            metadata.insert(HASH_KEY, Self::ascii(signature, "signature")?);
        }
        if let Some(ip) = self.real_ip {
            metadata.insert(REAL_IP_KEY, Self::ascii(&ip.to_string(), "source address")?);
        }

        let response = self.client.clone().update_metrics(request).await?.into_inner();
        if !response.error.is_empty() {
            return Err(TransmissionError::Rejected(response.error));
        }

        debug!(bytes = bytes_sent, "batch delivered over gRPC");
        Ok(())
    }
}

impl Transport for GrpcTransport {
    fn send<'a>(&'a self, body: &'a [u8]) -> SendFuture<'a> {
        Box::pin(self.deliver(body))
    }

    fn name(&self) -> &'static str {
        "grpc"
    }
}
