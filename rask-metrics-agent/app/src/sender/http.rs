use super::{SealedPayload, Sealer, SendFuture, TransmissionError, Transport};
use rask_metrics_core::{GZIP, HASH_KEY, REAL_IP_KEY};
use reqwest::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
    USER_AGENT,
};
use reqwest::{Client, Url};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Posts sealed batches to `{base}/updates/`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: Url,
    sealer: Arc<Sealer>,
    real_ip: Option<IpAddr>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        sealer: Arc<Sealer>,
        real_ip: Option<IpAddr>,
        timeout: Duration,
    ) -> Result<Self, TransmissionError> {
        let url = Url::parse(&format!("{}/updates/", base_url.trim_end_matches('/')))
            .map_err(|e| TransmissionError::InvalidEndpoint(format!("{base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url,
            sealer,
            real_ip,
        })
    }

    pub fn build_headers(&self, sealed: &SealedPayload) -> Result<HeaderMap, TransmissionError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(GZIP));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(GZIP));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("rask-metrics-agent/", env!("CARGO_PKG_VERSION"))),
        );

        if let Some(signature) = &sealed.signature {
            headers.insert(
                HeaderName::from_static(HASH_KEY),
                HeaderValue::from_str(signature).map_err(|e| {
                    TransmissionError::InvalidHeaderValue(format!("Invalid signature: {e}"))
                })?,
            );
        }

        if let Some(ip) = self.real_ip {
            headers.insert(
                HeaderName::from_static(REAL_IP_KEY),
                HeaderValue::from_str(&ip.to_string()).map_err(|e| {
                    TransmissionError::InvalidHeaderValue(format!("Invalid source address: {e}"))
                })?,
            );
        }

        Ok(headers)
    }

    async fn deliver(&self, body: &[u8]) -> Result<(), TransmissionError> {
        let start = Instant::now();
        let sealed = self.sealer.seal(body)?;
        let headers = self.build_headers(&sealed)?;
        let bytes_sent = sealed.bytes.len();

        let response = self
            .client
            .post(self.url.clone())
            .headers(headers)
            .body(sealed.bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransmissionError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        debug!(
            url = %self.url,
            bytes = bytes_sent,
            latency_ms = start.elapsed().as_millis() as u64,
            "batch delivered over HTTP"
        );
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, body: &'a [u8]) -> SendFuture<'a> {
        Box::pin(self.deliver(body))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
