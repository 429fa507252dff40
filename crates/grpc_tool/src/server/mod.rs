//! Server-side runner.
//!
//! Serves a set of tonic routes with the configured keepalive policy until a
//! cancellation token fires, then shuts down gracefully.

mod config;
mod runner;

pub use config::GrpcServerConfig;
pub use runner::{GrpcServer, ServerInterceptor};
