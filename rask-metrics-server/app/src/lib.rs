#![warn(rust_2018_idioms)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned
)]

pub mod app;
pub mod config;
pub mod error;
pub mod grpc;
pub mod handler;
pub mod healthcheck;
pub mod middleware;
pub mod provider;
pub mod storage;

pub use healthcheck::{healthcheck, healthcheck_with_port};
