//! tonic adapter: metadata in, metadata out.

use super::stages::accepts_gzip;
use super::{InboundRequest, OutboundResponse, PipelineError};
use rask_metrics_core::proto::{EncryptedMessage, MetricsResponse};
use rask_metrics_core::{HASH_KEY, REAL_IP_KEY};
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::{Request, Response, Status};

fn metadata_string(metadata: &MetadataMap, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Lifts a gRPC request into the shape the pipeline stages operate on.
pub fn inbound(request: Request<EncryptedMessage>) -> InboundRequest {
    let metadata = request.metadata();
    InboundRequest {
        real_ip: metadata_string(metadata, REAL_IP_KEY),
        signature: metadata_string(metadata, HASH_KEY),
        content_encoding: metadata_string(metadata, "content-encoding"),
        accepts_gzip: metadata_string(metadata, "accept-encoding")
            .is_some_and(|value| accepts_gzip(&value)),
        body: request.into_inner().blob,
    }
}

/// Wraps a processed response body, copying encoding and signature into
/// response metadata.
pub fn respond(
    outbound: OutboundResponse,
    error: String,
) -> Result<Response<MetricsResponse>, Status> {
    let signature = outbound
        .signature
        .as_deref()
        .map(AsciiMetadataValue::try_from)
        .transpose()
        .map_err(|e| Status::internal(format!("Invalid response signature: {e}")))?;

    let mut response = Response::new(MetricsResponse {
        blob: outbound.body,
        error,
    });
    let metadata = response.metadata_mut();
    if let Some(encoding) = outbound.content_encoding {
        metadata.insert("content-encoding", AsciiMetadataValue::from_static(encoding));
    }
    if let Some(signature) = signature {
        metadata.insert(HASH_KEY, signature);
    }
    Ok(response)
}

impl From<PipelineError> for Status {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UntrustedSource(_) => Status::permission_denied(err.to_string()),
            PipelineError::MethodNotAllowed(_) => Status::unimplemented(err.to_string()),
            PipelineError::Compress(_) => Status::internal(err.to_string()),
            PipelineError::UnsupportedContentType(_)
            | PipelineError::BadSignature
            | PipelineError::Decrypt(_)
            | PipelineError::Decompress(_)
            | PipelineError::Body(_) => Status::invalid_argument(err.to_string()),
        }
    }
}
