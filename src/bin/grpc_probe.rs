use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use micro_service::grpc_tool::{AutoReconnectingConnection, ReconnectConfig, WorkError};
use micro_service::{handler, reconnecting_client_handler, run_services};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_TARGET: &str = "grpc://localhost:50051";

/// How often the probe checks the current connection and asks for a reconnect if it's down.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let target = std::env::var("GRPC_TARGET").unwrap_or_else(|_| DEFAULT_TARGET.to_string());
    let mut config = ReconnectConfig::default();
    if let Ok(secs) = std::env::var("GRPC_DIAL_TIMEOUT_SECS") {
        let secs: u64 = secs
            .parse()
            .with_context(|| format!("invalid GRPC_DIAL_TIMEOUT_SECS: {secs}"))?;
        config = config.with_dial_timeout(Duration::from_secs(secs));
    }

    let manager = AutoReconnectingConnection::new(&target, config)?;
    info!(address = %manager.target(), "Probing gRPC target");

    let watcher = manager.clone();
    let checker = manager.clone();

    run_services([
        reconnecting_client_handler(manager, |connection| async move {
            connection
                .channel()
                .map(|_| ())
                .ok_or_else(|| WorkError::connection("connection closed before use"))
        }),
        // Ends by itself once the manager reports stopped.
        handler(move |_token| async move {
            let mut states = watcher.state_changes();
            while let Some(state) = states.next().await {
                info!(state = %state, valid = watcher.is_valid(), "Manager state");
            }
        }),
        handler(move |token| async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !checker.is_valid() {
                            checker.request_reconnect();
                        }
                    }
                }
            }
        }),
    ])
    .await;

    Ok(())
}
