//! Request/response transformation chain shared by both surfaces.
//!
//! A [`Pipeline`] is an ordered list of stages built from settings; a stage
//! whose setting is absent is simply not inserted. The HTTP adapter in
//! [`http`] and the gRPC adapter in [`grpc`] translate their transport's
//! headers or metadata into an [`InboundRequest`] and back.

pub mod grpc;
pub mod http;
pub mod stages;

use crate::config::Settings;
use rask_metrics_core::compression::CodecError;
use rask_metrics_core::crypto::{CryptoError, PrivateKey, Signer};
use rask_metrics_core::net::TrustedSubnet;
use thiserror::Error;

pub use stages::{Decrypt, Gunzip, GzipResponse, SignResponse, SignatureCheck, SubnetGate};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("Source address {} is not trusted", .0.as_deref().unwrap_or("<missing>"))]
    UntrustedSource(Option<String>),
    #[error("Request signature does not match payload")]
    BadSignature,
    #[error("Failed to decrypt payload: {0}")]
    Decrypt(CryptoError),
    #[error("Failed to decompress payload: {0}")]
    Decompress(CodecError),
    #[error("Failed to read request body: {0}")]
    Body(String),
    #[error("Failed to compress response: {0}")]
    Compress(CodecError),
}

/// What the request stages see: transport metadata plus the body bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    pub real_ip: Option<String>,
    pub signature: Option<String>,
    pub content_encoding: Option<String>,
    pub accepts_gzip: bool,
    pub body: Vec<u8>,
}

impl InboundRequest {
    pub fn is_gzipped(&self) -> bool {
        self.content_encoding
            .as_deref()
            .is_some_and(|encoding| encoding.trim().eq_ignore_ascii_case("gzip"))
    }
}

/// What the response stages produce; adapters copy the fields into headers
/// or metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundResponse {
    pub body: Vec<u8>,
    pub content_encoding: Option<&'static str>,
    pub signature: Option<String>,
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, request: InboundRequest) -> Result<InboundRequest, PipelineError>;
}

pub trait ResponseStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        request: &InboundRequest,
        response: OutboundResponse,
    ) -> Result<OutboundResponse, PipelineError>;
}

/// Body size cap used when none is configured.
pub const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

pub struct Pipeline {
    request: Vec<Box<dyn Stage>>,
    response: Vec<Box<dyn ResponseStage>>,
    max_body_bytes: u64,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            request: Vec::new(),
            response: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest body accepted on the wire and after decompression.
    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    /// Subnet gate, signature check, decrypt, gunzip on the way in; gzip and
    /// sign on the way out.
    pub fn build(
        trusted_subnet: Option<TrustedSubnet>,
        signer: Option<Signer>,
        private_key: Option<PrivateKey>,
        max_body_bytes: u64,
    ) -> Self {
        let mut pipeline = Pipeline {
            max_body_bytes,
            ..Pipeline::default()
        };
        if let Some(subnet) = trusted_subnet {
            pipeline = pipeline.with_stage(SubnetGate::new(subnet));
        }
        if let Some(signer) = &signer {
            pipeline = pipeline.with_stage(SignatureCheck::new(signer.clone()));
        }
        if let Some(key) = private_key {
            pipeline = pipeline.with_stage(Decrypt::new(key));
        }
        pipeline = pipeline
            .with_stage(Gunzip::new(max_body_bytes))
            .with_response_stage(GzipResponse);
        if let Some(signer) = signer {
            pipeline = pipeline.with_response_stage(SignResponse::new(signer));
        }
        pipeline
    }

    /// Loads keys named in `settings` and builds the chain.
    pub fn from_settings(settings: &Settings) -> Result<Self, CryptoError> {
        let signer = settings.signing_key().map(Signer::new).transpose()?;
        let private_key = settings
            .crypto_key
            .as_ref()
            .map(|path| PrivateKey::from_pem_file(path, settings.padding))
            .transpose()?;
        Ok(Self::build(
            settings.trusted_subnet,
            signer,
            private_key,
            settings.max_body_bytes,
        ))
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.request.push(Box::new(stage));
        self
    }

    #[must_use]
    pub fn with_response_stage(mut self, stage: impl ResponseStage + 'static) -> Self {
        self.response.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.request
            .iter()
            .map(|s| s.name())
            .chain(self.response.iter().map(|s| s.name()))
            .collect()
    }

    pub fn process_request(&self, request: InboundRequest) -> Result<InboundRequest, PipelineError> {
        self.request
            .iter()
            .try_fold(request, |request, stage| stage.apply(request))
    }

    pub fn finish_response(
        &self,
        request: &InboundRequest,
        body: Vec<u8>,
    ) -> Result<OutboundResponse, PipelineError> {
        let response = OutboundResponse {
            body,
            ..OutboundResponse::default()
        };
        self.response
            .iter()
            .try_fold(response, |response, stage| stage.apply(request, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rask_metrics_core::compression;

    fn key() -> PrivateKey {
        PrivateKey::from_pem(
            include_str!("../../tests/fixtures/private.pem"),
            Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_unconfigured_stages_are_skipped() {
        let pipeline = Pipeline::build(None, None, None, 1024);
        assert_eq!(pipeline.stage_names(), vec!["gunzip", "gzip-response"]);

        let full = Pipeline::build(
            Some("10.0.0.0/8".parse().unwrap()),
            Some(Signer::new(b"k").unwrap()),
            Some(key()),
            1024,
        );
        assert_eq!(
            full.stage_names(),
            vec!["subnet", "signature", "decrypt", "gunzip", "gzip-response", "sign-response"]
        );
    }

    #[test]
    fn test_full_chain_reverses_agent_sealing() {
        let private = key();
        let public = private.public_key();
        let signer = Signer::new(b"secret").unwrap();
        let pipeline = Pipeline::build(
            Some("192.168.0.0/16".parse().unwrap()),
            Some(signer.clone()),
            Some(private),
            1 << 20,
        );

        let body = br#"[{"id":"Hits","type":"counter","delta":1}]"#;
        let wire = public.encrypt(&compression::compress(body).unwrap()).unwrap();
        let request = InboundRequest {
            real_ip: Some("192.168.1.4".into()),
            signature: Some(signer.sign(&wire)),
            content_encoding: Some("gzip".into()),
            accepts_gzip: true,
            body: wire,
        };

        let processed = pipeline.process_request(request).unwrap();
        assert_eq!(processed.body, body);

        let response = pipeline
            .finish_response(&processed, b"[]".to_vec())
            .unwrap();
        assert_eq!(response.content_encoding, Some("gzip"));
        assert!(signer.verify(&response.body, response.signature.as_deref().unwrap()));
        assert_eq!(compression::decompress(&response.body, 1024).unwrap(), b"[]");
    }

    #[test]
    fn test_subnet_runs_before_signature() {
        let pipeline = Pipeline::build(
            Some("10.0.0.0/8".parse().unwrap()),
            Some(Signer::new(b"secret").unwrap()),
            None,
            1024,
        );
        let request = InboundRequest {
            real_ip: Some("172.16.0.1".into()),
            signature: Some("bogus".into()),
            body: b"{}".to_vec(),
            ..InboundRequest::default()
        };
        assert!(matches!(
            pipeline.process_request(request),
            Err(PipelineError::UntrustedSource(Some(_)))
        ));
    }
}
