use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tonic::service::{Interceptor, InterceptorLayer, Routes};
use tonic::transport::Server;
use tonic::{Request, Status};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ServerError};
use crate::keepalive::ServerKeepalive;
use crate::server::config::GrpcServerConfig;

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion) doesn't spin.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Inspects, annotates or rejects a request before it reaches its service.
///
/// Sees request metadata only, and runs for unary and streaming calls alike.
pub type ServerInterceptor =
    Arc<dyn Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static>;

/// A gRPC server bound to a set of routes.
pub struct GrpcServer {
    config: GrpcServerConfig,
    routes: Routes,
    interceptors: Vec<ServerInterceptor>,
}

impl GrpcServer {
    pub fn new(config: GrpcServerConfig, routes: Routes) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            routes,
            interceptors: Vec::new(),
        })
    }

    /// Run `interceptor` on every request, after the interceptors added before it. The
    /// first rejection ends the chain and is returned to the caller.
    pub fn with_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// The configuration this server was built with.
    pub fn config(&self) -> &GrpcServerConfig {
        &self.config
    }

    /// Listen on `0.0.0.0:{port}` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let port = self.config.require_port()?;
        self.run_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), shutdown)
            .await
    }

    /// Listen on `addr` until `shutdown` is cancelled. The configured port is ignored.
    pub async fn run_on(
        self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections accepted from `listener` until `shutdown` is cancelled, then
    /// wait for in-flight connections to finish.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        let keepalive = &self.config.keepalive;

        info!(addr = %local_addr, "gRPC server listening");
        debug!(
            interval = ?keepalive.interval,
            timeout = ?keepalive.timeout,
            max_connection_age = ?keepalive.max_connection_age,
            min_ping_interval = ?keepalive.min_ping_interval,
            permit_without_stream = keepalive.permit_without_stream,
            max_connection_idle = ?keepalive.max_connection_idle,
            max_connection_age_grace = ?keepalive.max_connection_age_grace,
            "Server keepalive policy"
        );
        for setting in unenforced_settings(keepalive) {
            warn!(setting, "Server keepalive setting is not enforced");
        }

        let mut builder = Server::builder()
            .http2_keepalive_interval(Some(keepalive.interval))
            .http2_keepalive_timeout(Some(keepalive.timeout))
            .max_connection_age(keepalive.max_connection_age)
            .max_connection_age_grace(keepalive.max_connection_age_grace)
            .layer(InterceptorLayer::new(InterceptorChain(self.interceptors)));

        let incoming = accept_loop(listener, self.config.tcp_nodelay);
        builder
            .add_routes(self.routes)
            .serve_with_incoming_shutdown(Box::pin(incoming), shutdown.cancelled_owned())
            .await?;

        info!(addr = %local_addr, "gRPC server stopped");
        Ok(())
    }
}

#[derive(Clone)]
struct InterceptorChain(Vec<ServerInterceptor>);

impl Interceptor for InterceptorChain {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.0
            .iter()
            .try_fold(request, |request, interceptor| interceptor(request))
    }
}

/// Names of the settings in `keepalive` that differ from the defaults but that tonic's
/// server has no knob for.
fn unenforced_settings(keepalive: &ServerKeepalive) -> Vec<&'static str> {
    let defaults = ServerKeepalive::default();
    let mut settings = Vec::new();
    if keepalive.min_ping_interval != defaults.min_ping_interval {
        settings.push("min_ping_interval");
    }
    if keepalive.permit_without_stream != defaults.permit_without_stream {
        settings.push("permit_without_stream");
    }
    if keepalive.max_connection_idle != defaults.max_connection_idle {
        settings.push("max_connection_idle");
    }
    settings
}

fn accept_loop(listener: TcpListener, nodelay: bool) -> impl Stream<Item = io::Result<TcpStream>> {
    async_stream::stream! {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(nodelay) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    debug!(peer = %peer, "Accepted connection");
                    yield Ok::<_, io::Error>(stream);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                }
            }
        }
    }
}
