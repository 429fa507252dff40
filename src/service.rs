//! Process lifecycle: run a set of long-lived handlers until the process is told to stop.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-lived unit of work. It receives its own token and must return promptly once
/// that token is cancelled.
pub type ServiceHandler = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Box an async closure into a [`ServiceHandler`].
pub fn handler<F, Fut>(f: F) -> ServiceHandler
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |token| Box::pin(f(token)))
}

/// Run every handler on its own task until SIGINT or SIGTERM, then cancel them all and
/// wait for each to return.
pub async fn run_services(handlers: impl IntoIterator<Item = ServiceHandler>) {
    run_services_until(shutdown_signal(), handlers).await
}

/// Like [`run_services`], with the shutdown trigger supplied by the caller.
pub async fn run_services_until<S>(signal: S, handlers: impl IntoIterator<Item = ServiceHandler>)
where
    S: Future<Output = ()>,
{
    let root = CancellationToken::new();
    let mut services = JoinSet::new();
    for handler in handlers {
        services.spawn(handler(root.child_token()));
    }
    info!(services = services.len(), "Services started");

    signal.await;
    info!("Shutdown signal received, stopping services");
    root.cancel();

    while let Some(result) = services.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Service task failed");
        }
    }
    info!("All services stopped");
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
