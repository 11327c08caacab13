#![warn(rust_2018_idioms)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_possible_truncation, // Allocator byte counts fit comfortably in f64/u64
    clippy::cast_precision_loss,      // Gauges are f64 by definition
    clippy::cast_sign_loss,           // Byte counters are non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. CollectorError in collector module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Metric names are not code
)]

pub mod app;
pub mod collector;
pub mod sender;

pub use app::{Config, ServiceManager};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
