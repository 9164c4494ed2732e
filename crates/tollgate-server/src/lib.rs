//! HTTP server for Tollgate.
//!
//! Serves HTTP/1.1 over Tokio and Hyper. Every request passes through an
//! admission [`Pipeline`](tollgate_middleware::Pipeline) before reaching its
//! routed handler. A [`ShutdownSignal`] moves the server through a bounded
//! graceful drain.
//!
//! ```text
//! Starting ──▶ Running ──▶ Draining ──▶ Stopped
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_server::{handler::{handler_fn, text}, Router, Server, ServerConfig};
//! use http::{Method, StatusCode};
//!
//! let router = Router::new().route(
//!     Method::GET,
//!     "/",
//!     handler_fn(|_req| async { text(StatusCode::OK, "hello") }),
//! );
//!
//! let report = Server::builder()
//!     .config(ServerConfig::builder().http_addr("127.0.0.1:7171").build())
//!     .router(router)
//!     .build()
//!     .run()
//!     .await?;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod router;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::ServerError;
pub use handler::{handler_fn, BoxedHandler, PathParams};
pub use lifecycle::{DrainOutcome, Lifecycle, LifecycleState, ShutdownReport};
pub use router::{RouteMatch, Router};
pub use server::{BoundServer, Server, ServerBuilder};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
