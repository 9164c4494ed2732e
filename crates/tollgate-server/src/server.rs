//! HTTP server with admission control and graceful drain.
//!
//! # Architecture
//!
//! - A TCP listener bound to the configured address
//! - One accept-loop task that spawns a task per connection
//! - Every request is buffered, matched against the [`Router`], run through
//!   the admission [`Pipeline`], then handed to its handler
//! - A [`ShutdownSignal`] that moves the server from running to draining
//!
//! On shutdown the accept loop stops and is joined, idle keep-alive
//! connections are closed, and in-flight requests get until the drain
//! deadline to finish. Whatever is still open at the deadline is abandoned.
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_server::{Server, ServerConfig, Router};
//!
//! let server = Server::builder()
//!     .config(ServerConfig::builder().http_addr("0.0.0.0:7171").build())
//!     .router(router)
//!     .pipeline(pipeline)
//!     .build();
//!
//! let report = server.run().await?;
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tollgate_middleware::{BoxFuture, MiddlewareContext, Pipeline, Request, Response};
use tollgate_telemetry::logging::fields;
use tollgate_telemetry::metrics::record_drain_outcome;
use tollgate_telemetry::InFlightGuard;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::{json_error, not_found};
use crate::lifecycle::{DrainOutcome, Lifecycle, LifecycleState, ShutdownReport};
use crate::router::Router;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Pause after a transient accept error before accepting again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by every connection task.
struct Shared {
    router: Router,
    pipeline: Pipeline,
    request_timeout: Duration,
}

/// The Tollgate HTTP server.
///
/// Built with [`Server::builder()`]; consumed by [`Server::run`],
/// [`Server::run_with_shutdown`], or [`Server::bind`].
pub struct Server {
    config: ServerConfig,
    shared: Arc<Shared>,
    lifecycle: Arc<Lifecycle>,
}

impl Server {
    /// Creates a server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.shared.router
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Subscribes to lifecycle transitions.
    #[must_use]
    pub fn lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Runs until SIGINT or SIGTERM, then drains.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, binding fails, or the
    /// accept loop fails. A forced drain is reported, not returned as an error.
    pub async fn run(self) -> Result<ShutdownReport, ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals())
            .await
    }

    /// Runs until `shutdown` is triggered, then drains.
    ///
    /// # Errors
    ///
    /// See [`Server::run`].
    pub async fn run_with_shutdown(
        self,
        shutdown: ShutdownSignal,
    ) -> Result<ShutdownReport, ServerError> {
        self.bind().await?.serve(shutdown).await
    }

    /// Binds the listener without accepting yet.
    ///
    /// Bind failure is fatal: the server moves straight to
    /// [`LifecycleState::Stopped`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidAddress`] or [`ServerError::Bind`].
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        match self.try_bind().await {
            Ok(bound) => Ok(bound),
            Err(e) => {
                tracing::error!(error = %e, addr = self.config.http_addr(), "Failed to start server");
                self.lifecycle.advance(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    async fn try_bind(&self) -> Result<BoundServer, ServerError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|source| ServerError::InvalidAddress {
                addr: self.config.http_addr().to_string(),
                source,
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(BoundServer {
            listener,
            local_addr,
            shutdown_timeout: self.config.shutdown_timeout(),
            shared: Arc::clone(&self.shared),
            lifecycle: Arc::clone(&self.lifecycle),
        })
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("router", &self.shared.router)
            .field("pipeline", &self.shared.pipeline)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

/// A server whose listener is bound and ready to accept.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
    shared: Arc<Shared>,
    lifecycle: Arc<Lifecycle>,
}

impl BoundServer {
    /// Returns the bound address, with the real port when bound to port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribes to lifecycle transitions.
    #[must_use]
    pub fn lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Accepts connections until `shutdown` is triggered, then drains.
    ///
    /// Connections still open at the drain deadline are aborted, along with
    /// their handlers, before the server reports [`LifecycleState::Stopped`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Accept`] if the accept loop fails with a
    /// non-transient error, or [`ServerError::Join`] if its task dies.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<ShutdownReport, ServerError> {
        let Self {
            listener,
            local_addr,
            shutdown_timeout,
            shared,
            lifecycle,
        } = self;

        run_until_drained(
            listener,
            local_addr,
            shutdown_timeout,
            shared,
            &lifecycle,
            shutdown,
        )
        .await
    }
}

impl std::fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundServer")
            .field("local_addr", &self.local_addr)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Source of inbound connections.
trait Listener: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Listener for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Connection tasks owned by the accept loop. Dropping the set aborts them.
type Connections = JoinSet<()>;

async fn run_until_drained<L: Listener>(
    listener: L,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
    shared: Arc<Shared>,
    lifecycle: &Lifecycle,
    shutdown: ShutdownSignal,
) -> Result<ShutdownReport, ServerError> {
    let tracker = ConnectionTracker::new();
    lifecycle.advance(LifecycleState::Running);
    tracing::info!(addr = %local_addr, "Server listening");

    let mut accept_task = tokio::spawn(accept_loop(
        listener,
        shared,
        tracker.clone(),
        shutdown.clone(),
    ));

    // Wait for the signal. The accept loop only ends on its own if it hit a
    // fatal error.
    let early_exit = tokio::select! {
        () = shutdown.recv() => None,
        joined = &mut accept_task => Some(joined),
    };

    if let Some(joined) = early_exit {
        let result = match joined {
            Ok((mut connections, result)) => {
                abort_all(&mut connections).await;
                result
            }
            Err(e) => Err(e.into()),
        };
        lifecycle.advance(LifecycleState::Stopped);
        return match result {
            Err(e) => Err(e),
            Ok(()) => Err(ServerError::Accept(io::Error::other(
                "accept loop exited without a shutdown signal",
            ))),
        };
    }

    lifecycle.advance(LifecycleState::Draining);

    // The listener is dropped when the accept loop returns.
    let (mut connections, accepted) = match accept_task.await {
        Ok(joined) => joined,
        Err(e) => (Connections::new(), Err(e.into())),
    };

    let in_flight_at_signal = tracker.active_connections();
    tracing::info!(
        in_flight = in_flight_at_signal,
        deadline = ?shutdown_timeout,
        "Draining in-flight connections"
    );

    let started = Instant::now();
    let outcome = tokio::select! {
        () = tracker.wait_for_shutdown() => DrainOutcome::Clean,
        () = tokio::time::sleep(shutdown_timeout) => DrainOutcome::Forced {
            abandoned: tracker.active_connections(),
        },
    };

    match outcome {
        DrainOutcome::Clean => {
            tracing::info!(elapsed = ?started.elapsed(), "All connections closed");
        }
        DrainOutcome::Forced { abandoned } => {
            tracing::warn!(
                abandoned,
                deadline = ?shutdown_timeout,
                "Drain deadline reached, aborting connections"
            );
        }
    }
    abort_all(&mut connections).await;
    let drain_duration = started.elapsed();

    record_drain_outcome(outcome.is_forced());
    lifecycle.advance(LifecycleState::Stopped);

    accepted?;

    Ok(ShutdownReport {
        local_addr,
        in_flight_at_signal,
        outcome,
        drain_duration,
    })
}

/// Aborts every connection task and waits until each has been dropped.
async fn abort_all(connections: &mut Connections) {
    connections.abort_all();
    while connections.join_next().await.is_some() {}
}

/// Accepts connections until shutdown.
///
/// Transient errors are logged and retried after a short pause. Any other
/// accept error ends the loop and is returned. The connection tasks are
/// handed back either way.
async fn accept_loop<L: Listener>(
    listener: L,
    shared: Arc<Shared>,
    tracker: ConnectionTracker,
    shutdown: ShutdownSignal,
) -> (Connections, Result<(), ServerError>) {
    let mut connections = Connections::new();

    loop {
        // Reap finished connections so the set only holds live ones.
        while connections.try_join_next().is_some() {}

        let accepted = tokio::select! {
            () = shutdown.recv() => {
                tracing::debug!("Accept loop stopping");
                return (connections, Ok(()));
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let shared = Arc::clone(&shared);
                let token = tracker.acquire();
                let shutdown = shutdown.clone();

                connections.spawn(async move {
                    let _in_flight = InFlightGuard::new();
                    let _token = token;
                    if let Err(e) = serve_connection(shared, stream, shutdown).await {
                        tracing::debug!({ fields::PEER } = %peer, error = %e, "Connection error");
                    }
                });
            }
            Err(e) if is_transient(&e) => {
                tracing::warn!(error = %e, "Transient accept error");
                tokio::select! {
                    () = shutdown.recv() => return (connections, Ok(())),
                    () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Accept failed");
                return (connections, Err(ServerError::Accept(e)));
            }
        }
    }
}

/// Accept errors that concern one connection or a momentary resource limit.
fn is_transient(error: &io::Error) -> bool {
    // ENFILE and EMFILE share these numbers on Linux and the BSDs.
    const ENFILE: i32 = 23;
    const EMFILE: i32 = 24;

    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(error.raw_os_error(), Some(ENFILE | EMFILE))
}

/// Serves one connection until it closes.
///
/// On shutdown, idle keep-alive connections close at once and a request in
/// progress is allowed to finish.
async fn serve_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |req: http::Request<Incoming>| {
        let shared = Arc::clone(&shared);
        async move { Ok::<_, Infallible>(handle_request(&shared, req).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => return result,
        () = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
        }
    }
    conn.await
}

/// Buffers the request body, then dispatches the request.
///
/// Reading the body and running the handler share one `request_timeout`
/// budget.
async fn handle_request(shared: &Shared, req: http::Request<Incoming>) -> Response {
    let deadline = Instant::now() + shared.request_timeout;
    let (parts, body) = req.into_parts();

    let body = match tokio::time::timeout_at(deadline, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return json_error(
                StatusCode::BAD_REQUEST,
                "BODY_READ_ERROR",
                "Failed to read request body",
            );
        }
        Err(_) => {
            return json_error(
                StatusCode::REQUEST_TIMEOUT,
                "REQUEST_TIMEOUT",
                "Request body was not received in time",
            );
        }
    };

    let request = http::Request::from_parts(parts, Full::new(body));
    dispatch(shared, request, deadline).await
}

/// Routes a buffered request, runs it through the pipeline, and invokes the
/// matched handler if the pipeline lets it through.
///
/// A handler still running at `deadline` is cancelled with a 504.
async fn dispatch(shared: &Shared, request: Request, deadline: Instant) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let matched = shared.router.match_route(&method, &path);

    let ctx = match &matched {
        Some(m) => MiddlewareContext::for_route(m.template()),
        None => MiddlewareContext::new(),
    };
    let request_id = ctx.request_id();
    let started = ctx.started_at();

    let terminal = move |_ctx: &mut MiddlewareContext,
                         mut request: Request|
          -> BoxFuture<'static, Response> {
        match matched {
            Some(m) => {
                let (params, handler) = m.into_parts();
                request.extensions_mut().insert(params);
                let response = handler(request);
                Box::pin(async move {
                    tokio::time::timeout_at(deadline, response)
                        .await
                        .unwrap_or_else(|_| {
                            tracing::warn!("Handler timed out");
                            json_error(
                                StatusCode::GATEWAY_TIMEOUT,
                                "HANDLER_TIMEOUT",
                                "Handler execution timed out",
                            )
                        })
                })
            }
            None => {
                let response = not_found(request.uri().path());
                Box::pin(async move { response })
            }
        }
    };

    let response = shared.pipeline.process(ctx, request, terminal).await;

    tracing::debug!(
        { fields::REQUEST_ID } = %request_id,
        { fields::HTTP_METHOD } = %method,
        { fields::HTTP_PATH } = %path,
        { fields::HTTP_STATUS } = response.status().as_u16(),
        { fields::DURATION_MS } = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<ServerConfig>,
    router: Router,
    pipeline: Pipeline,
}

impl ServerBuilder {
    /// Creates a builder with default configuration, no routes, and an empty
    /// pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the router.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Sets the admission pipeline every routed and unrouted request passes
    /// through.
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Builds the server in [`LifecycleState::Starting`].
    #[must_use]
    pub fn build(self) -> Server {
        let config = self.config.unwrap_or_default();
        Server {
            shared: Arc::new(Shared {
                router: self.router,
                pipeline: self.pipeline,
                request_timeout: config.request_timeout(),
            }),
            config,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }
}
