//! Adapters that turn the gRPC building blocks into [`ServiceHandler`]s.

use std::future::Future;

use grpc_tool::{AutoReconnectingConnection, Dialer, GrpcServer, ManagedConnection, WorkError};
use tokio::net::TcpListener;
use tracing::error;

use crate::service::{ServiceHandler, handler};

/// Serve until the handler's token is cancelled. Bind and serve errors are logged.
pub fn grpc_server_handler(server: GrpcServer) -> ServiceHandler {
    handler(move |token| async move {
        let port = server.config().port;
        if let Err(e) = server.run(token).await {
            error!(port, error = %e, "gRPC server failed");
        }
    })
}

/// Serve connections from an already bound `listener` until the handler's token is
/// cancelled. Serve errors are logged.
pub fn grpc_listener_handler(server: GrpcServer, listener: TcpListener) -> ServiceHandler {
    handler(move |token| async move {
        let addr = listener.local_addr().ok();
        if let Err(e) = server.serve(listener, token).await {
            error!(addr = ?addr, error = %e, "gRPC server failed");
        }
    })
}

/// Supervise `manager` with `work` until the handler's token is cancelled, then stop it
/// and wait for its connection to be released.
pub fn reconnecting_client_handler<D, F, Fut>(
    manager: AutoReconnectingConnection<D>,
    work: F,
) -> ServiceHandler
where
    D: Dialer,
    F: Fn(ManagedConnection<D>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    handler(move |token| async move {
        let supervise = manager.start(work);
        tokio::pin!(supervise);

        let result = tokio::select! {
            result = &mut supervise => result,
            _ = token.cancelled() => {
                manager.stop();
                supervise.await
            }
        };
        if let Err(e) = result {
            error!(address = %manager.target(), error = %e, "Connection manager failed");
        }
    })
}
