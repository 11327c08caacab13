//! Generates the `Metrics` gRPC client and server stubs.
//!
//! The message types are hand-written prost structs in `src/proto.rs`, so the
//! service is described with the manual builder and no `protoc` is needed.
//! `proto/metrics.proto` documents the same contract for non-Rust clients.

use tonic_build::manual::{Builder, Method, Service};

const INPUT: &str = "crate::proto::EncryptedMessage";
const OUTPUT: &str = "crate::proto::MetricsResponse";
const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(INPUT)
        .output_type(OUTPUT)
        .codec_path(CODEC)
        .build()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let service = Service::builder()
        .name("Metrics")
        .package("metrics")
        .method(unary("update_metric", "UpdateMetric"))
        .method(unary("update_metrics", "UpdateMetrics"))
        .method(unary("get_metric", "GetMetric"))
        .method(unary("list_metrics", "ListMetrics"))
        .method(unary("ping", "Ping"))
        .build();

    Builder::new().compile(&[service]);
}
