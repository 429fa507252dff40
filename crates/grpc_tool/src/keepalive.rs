use std::time::Duration;

use crate::error::ConfigError;

/// HTTP/2 keepalive settings for outbound connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeepalive {
    /// Ping the server after this much inactivity.
    pub interval: Duration,

    /// How long to wait for a ping ack before the connection is considered dead.
    pub timeout: Duration,

    /// Send pings even when no stream is active.
    pub permit_without_stream: bool,
}

impl Default for ClientKeepalive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            permit_without_stream: true,
        }
    }
}

impl ClientKeepalive {
    /// Set the ping interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the ping ack timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set whether pings are allowed with no active stream.
    pub fn with_permit_without_stream(mut self, permit: bool) -> Self {
        self.permit_without_stream = permit;
        self
    }

    /// Reject zero intervals and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Zero("client keepalive interval"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero("client keepalive timeout"));
        }
        Ok(())
    }
}

/// Keepalive enforcement and connection ageing for the gRPC server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeepalive {
    /// Clients pinging more often than this are considered abusive.
    /// Not enforced by [`GrpcServer`](crate::GrpcServer), which warns when it differs
    /// from the default.
    pub min_ping_interval: Duration,

    /// Accept pings from clients with no active stream.
    /// Not enforced by [`GrpcServer`](crate::GrpcServer), which warns when it differs
    /// from the default.
    pub permit_without_stream: bool,

    /// Idle connections are sent a GOAWAY after this long.
    /// Not enforced by [`GrpcServer`](crate::GrpcServer), which warns when it differs
    /// from the default.
    pub max_connection_idle: Duration,

    /// Any connection is sent a GOAWAY after this long.
    pub max_connection_age: Duration,

    /// Time allowed for in-flight RPCs after a max-age GOAWAY.
    pub max_connection_age_grace: Duration,

    /// Ping an idle client after this long.
    pub interval: Duration,

    /// Wait this long for a ping ack before dropping the connection.
    pub timeout: Duration,
}

impl Default for ServerKeepalive {
    fn default() -> Self {
        Self {
            min_ping_interval: Duration::from_secs(5),
            permit_without_stream: true,
            max_connection_idle: Duration::from_secs(15),
            max_connection_age: Duration::from_secs(4 * 60 * 60),
            max_connection_age_grace: Duration::from_secs(10),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
        }
    }
}

impl ServerKeepalive {
    /// Set the minimum ping interval expected from clients.
    pub fn with_min_ping_interval(mut self, interval: Duration) -> Self {
        self.min_ping_interval = interval;
        self
    }

    /// Set whether pings are allowed with no active stream.
    pub fn with_permit_without_stream(mut self, permit: bool) -> Self {
        self.permit_without_stream = permit;
        self
    }

    /// Set the idle time before a GOAWAY.
    pub fn with_max_connection_idle(mut self, idle: Duration) -> Self {
        self.max_connection_idle = idle;
        self
    }

    /// Set the maximum connection age.
    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age = age;
        self
    }

    /// Set the grace period after a max-age GOAWAY.
    pub fn with_max_connection_age_grace(mut self, grace: Duration) -> Self {
        self.max_connection_age_grace = grace;
        self
    }

    /// Set the ping interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the ping ack timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject zero intervals and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Zero("server keepalive interval"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero("server keepalive timeout"));
        }
        if self.max_connection_age.is_zero() {
            return Err(ConfigError::Zero("max connection age"));
        }
        Ok(())
    }
}
