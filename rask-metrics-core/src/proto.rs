//! gRPC wire types for the `metrics.Metrics` service (see `proto/metrics.proto`).
//!
//! The messages are declared by hand; `build.rs` generates the client and
//! server stubs that reference them.

/// Request envelope: the blob is the same byte string the HTTP surface
/// receives as a request body (optionally gzip-compressed and RSA-encrypted).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EncryptedMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub blob: Vec<u8>,
}

/// Response envelope. A non-empty `error` means the operation failed and
/// `blob` is empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricsResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub blob: Vec<u8>,
    #[prost(string, tag = "2")]
    pub error: String,
}

impl MetricsResponse {
    pub fn ok(blob: Vec<u8>) -> Self {
        Self {
            blob,
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            blob: Vec::new(),
            error: error.into(),
        }
    }
}

include!(concat!(env!("OUT_DIR"), "/metrics.Metrics.rs"));
