#![warn(rust_2018_idioms)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned
)]

//! Shared building blocks for the rask metrics agent and server.

pub mod compression;
pub mod crypto;
pub mod env;
pub mod metric;
pub mod net;
pub mod proto;
pub mod retry;

pub use metric::{Metric, MetricError, MetricKind, MetricQuery};

/// Header carrying the base64url HMAC-SHA256 of the wire payload.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header carrying the client-advertised source address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Lowercase forms of the headers above, as required for `HeaderName::from_static`
/// and gRPC metadata keys.
pub const HASH_KEY: &str = "hashsha256";
pub const REAL_IP_KEY: &str = "x-real-ip";

/// Encoding token used for gzip on both surfaces.
pub const GZIP: &str = "gzip";
