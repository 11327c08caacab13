use super::{InboundRequest, OutboundResponse, PipelineError, ResponseStage, Stage};
use rask_metrics_core::GZIP;
use rask_metrics_core::compression;
use rask_metrics_core::crypto::{PrivateKey, Signer};
use rask_metrics_core::net::TrustedSubnet;
use std::net::IpAddr;

/// Rejects requests whose advertised source address is missing or outside
/// the trusted subnet.
pub struct SubnetGate {
    subnet: TrustedSubnet,
}

impl SubnetGate {
    pub fn new(subnet: TrustedSubnet) -> Self {
        Self { subnet }
    }
}

impl Stage for SubnetGate {
    fn name(&self) -> &'static str {
        "subnet"
    }

    fn apply(&self, request: InboundRequest) -> Result<InboundRequest, PipelineError> {
        let trusted = request
            .real_ip
            .as_deref()
            .and_then(|raw| raw.trim().parse::<IpAddr>().ok())
            .is_some_and(|ip| self.subnet.contains(ip));
        if trusted {
            Ok(request)
        } else {
            Err(PipelineError::UntrustedSource(request.real_ip))
        }
    }
}

/// Verifies `HashSHA256` over the raw wire bytes when the client sent one.
pub struct SignatureCheck {
    signer: Signer,
}

impl SignatureCheck {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }
}

impl Stage for SignatureCheck {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn apply(&self, request: InboundRequest) -> Result<InboundRequest, PipelineError> {
        match request.signature.as_deref() {
            Some(signature) if !self.signer.verify(&request.body, signature.trim()) => {
                Err(PipelineError::BadSignature)
            }
            _ => Ok(request),
        }
    }
}

/// Decrypts non-empty bodies with the server's private key.
pub struct Decrypt {
    key: PrivateKey,
}

impl Decrypt {
    pub fn new(key: PrivateKey) -> Self {
        Self { key }
    }
}

impl Stage for Decrypt {
    fn name(&self) -> &'static str {
        "decrypt"
    }

    fn apply(&self, mut request: InboundRequest) -> Result<InboundRequest, PipelineError> {
        if request.body.is_empty() {
            return Ok(request);
        }
        request.body = self
            .key
            .decrypt(&request.body)
            .map_err(PipelineError::Decrypt)?;
        Ok(request)
    }
}

/// Inflates gzip bodies, bounded by `limit` bytes of output.
pub struct Gunzip {
    limit: u64,
}

impl Gunzip {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl Stage for Gunzip {
    fn name(&self) -> &'static str {
        "gunzip"
    }

    fn apply(&self, mut request: InboundRequest) -> Result<InboundRequest, PipelineError> {
        if !request.is_gzipped() || request.body.is_empty() {
            return Ok(request);
        }
        request.body = compression::decompress(&request.body, self.limit)
            .map_err(PipelineError::Decompress)?;
        request.content_encoding = None;
        Ok(request)
    }
}

/// Compresses the response for clients that accept gzip.
pub struct GzipResponse;

impl ResponseStage for GzipResponse {
    fn name(&self) -> &'static str {
        "gzip-response"
    }

    fn apply(
        &self,
        request: &InboundRequest,
        mut response: OutboundResponse,
    ) -> Result<OutboundResponse, PipelineError> {
        if !request.accepts_gzip {
            return Ok(response);
        }
        response.body = compression::compress(&response.body).map_err(PipelineError::Compress)?;
        response.content_encoding = Some(GZIP);
        Ok(response)
    }
}

/// Signs the final response bytes.
pub struct SignResponse {
    signer: Signer,
}

impl SignResponse {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }
}

impl ResponseStage for SignResponse {
    fn name(&self) -> &'static str {
        "sign-response"
    }

    fn apply(
        &self,
        _request: &InboundRequest,
        mut response: OutboundResponse,
    ) -> Result<OutboundResponse, PipelineError> {
        response.signature = Some(self.signer.sign(&response.body));
        Ok(response)
    }
}

/// Parses an `Accept-Encoding` value, honouring `q=0` exclusions.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    accept_encoding.split(',').any(|item| {
        let mut parts = item.split(';').map(str::trim);
        let coding = parts.next().unwrap_or_default();
        let refused = parts.any(|param| {
            param
                .strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        });
        coding.eq_ignore_ascii_case(GZIP) && !refused
    })
}
