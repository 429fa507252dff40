use anyhow::{Context, Result};
use micro_service::grpc_tool::{GrpcServer, GrpcServerConfig};
use micro_service::{grpc_server_handler, run_services};
use tonic::service::Routes;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 50051;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let port = match std::env::var("GRPC_PORT") {
        Ok(port) => port
            .parse()
            .with_context(|| format!("invalid GRPC_PORT: {port}"))?,
        Err(_) => DEFAULT_PORT,
    };

    // No services registered; the server only answers with UNIMPLEMENTED.
    let server = GrpcServer::new(GrpcServerConfig::new(port), Routes::default())?;
    info!(port, "Starting gRPC server");

    run_services([grpc_server_handler(server)]).await;
    Ok(())
}
