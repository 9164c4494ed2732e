//! # Tollgate
//!
//! A small user service behind admission control.
//!
//! Every request is counted per route, then offered to a token bucket;
//! admitted requests reach the user JSON API, the OAuth2 login stub, the
//! health check or the metrics endpoint. On SIGINT or SIGTERM the server
//! stops accepting and drains in-flight requests within a deadline.
//!
//! The pieces live in their own crates:
//!
//! - [`tollgate_config`]: layered configuration
//! - [`tollgate_middleware`]: the metrics and rate-limit pipeline
//! - [`tollgate_server`]: the HTTP server and its lifecycle
//! - [`tollgate_telemetry`]: logging and request counters

#![forbid(unsafe_code)]

pub mod app;
pub mod oauth;
pub mod users;

pub use app::{build_server, AppState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
