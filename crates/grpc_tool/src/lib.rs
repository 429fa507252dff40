//! Client and server plumbing for gRPC microservices.
//!
//! - [`Connection`]: one dialed transport channel with a derived validity check.
//! - [`AutoReconnectingConnection`]: keeps a working connection alive, redialing with
//!   backoff when the work routine rejects it.
//! - [`GrpcServer`]: runs tonic routes with a keepalive policy until cancelled.

pub mod connection;
pub mod error;
pub mod keepalive;
pub mod reconnect;
pub mod server;
pub mod target;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connection::{
    Connection, ConnectionConfig, ConnectivityState, DEFAULT_READINESS_CEILING, Dialer, Transport,
};
pub use error::{
    AddressParseError, BoxError, ConfigError, DialError, DialErrorKind, Error, ServerError,
    WorkError,
};
pub use keepalive::{ClientKeepalive, ServerKeepalive};
pub use reconnect::{
    AutoReconnectingConnection, BackoffConfig, ManagedConnection, ManagerState, ReconnectConfig,
};
pub use server::{GrpcServer, GrpcServerConfig, ServerInterceptor};
pub use target::{Scheme, Target};
pub use transport::{GrpcDialer, GrpcTransport};
pub use tokio_util::sync::CancellationToken;
