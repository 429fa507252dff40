use crate::error::ConfigError;
use crate::keepalive::ServerKeepalive;

/// Configuration for a [`GrpcServer`](super::GrpcServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcServerConfig {
    /// Port to listen on across all interfaces. Only consulted by
    /// [`GrpcServer::run`](super::GrpcServer::run).
    pub port: u16,

    pub keepalive: ServerKeepalive,

    /// Disable Nagle's algorithm on accepted connections.
    pub tcp_nodelay: bool,
}

impl GrpcServerConfig {
    /// Default keepalive policy and `TCP_NODELAY` on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            keepalive: ServerKeepalive::default(),
            tcp_nodelay: true,
        }
    }

    /// Set the server keepalive policy.
    pub fn with_keepalive(mut self, keepalive: ServerKeepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set whether Nagle's algorithm is disabled on accepted connections.
    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Check the keepalive policy. The port is checked by
    /// [`GrpcServer::run`](super::GrpcServer::run).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.keepalive.validate()
    }

    pub(crate) fn require_port(&self) -> Result<u16, ConfigError> {
        match self.port {
            0 => Err(ConfigError::Zero("server port")),
            port => Ok(port),
        }
    }
}
