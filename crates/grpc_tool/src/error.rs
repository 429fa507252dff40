use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::target::Target;

/// Boxed error type carried by work routine failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A dial target string could not be understood.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("address [{address}] error: {reason}")]
pub struct AddressParseError {
    pub address: String,
    pub reason: String,
}

impl AddressParseError {
    pub(crate) fn new(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reason: reason.into(),
        }
    }
}

/// Failed to establish a transport to a target within budget.
#[derive(Debug, Error)]
#[error("failed to dial [{address}]: {kind}")]
pub struct DialError {
    pub address: String,
    #[source]
    pub kind: DialErrorKind,
}

impl DialError {
    pub fn new(target: &Target, kind: DialErrorKind) -> Self {
        Self {
            address: target.address().to_owned(),
            kind,
        }
    }

    /// True if the attempt was abandoned because the manager is shutting down.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, DialErrorKind::Cancelled)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DialErrorKind {
    /// The transport did not become usable before the dial timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The dial was cancelled by shutdown.
    #[error("cancelled")]
    Cancelled,

    /// Socket level failure.
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),

    /// The gRPC transport refused the endpoint or failed the handshake.
    #[error("transport error: {0}")]
    Transport(#[source] tonic::transport::Error),

    /// The secure transport could not be configured.
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// Failure reported by a caller-supplied work routine.
///
/// The two variants drive different retry behaviour: a `Connection` failure discards
/// the live connection and redials, a `Routine` failure retries the routine on the same
/// connection as long as it is still valid.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkError {
    #[error("connection unusable: {0}")]
    Connection(#[source] BoxError),

    #[error("work routine failed: {0}")]
    Routine(#[source] BoxError),
}

impl WorkError {
    pub fn connection(err: impl Into<BoxError>) -> Self {
        WorkError::Connection(err.into())
    }

    pub fn routine(err: impl Into<BoxError>) -> Self {
        WorkError::Routine(err.into())
    }

    /// Whether this failure means the connection itself should be thrown away.
    pub fn discards_connection(&self) -> bool {
        matches!(self, WorkError::Connection(_))
    }
}

impl From<tonic::Status> for WorkError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unavailable | tonic::Code::Cancelled => {
                WorkError::Connection(status.into())
            }
            _ => WorkError::Routine(status.into()),
        }
    }
}

/// Structurally invalid configuration, detected before anything is started.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("backoff initial delay {initial:?} exceeds max delay {max:?}")]
    BackoffRange { initial: Duration, max: Duration },

    #[error("backoff multiplier must be a finite value >= 1.0, got {0}")]
    BackoffMultiplier(f64),
}

/// Errors raised by the gRPC server runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind gRPC listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read listener address")]
    LocalAddr(#[source] std::io::Error),

    #[error("failed to serve: {0}")]
    Serve(#[from] tonic::transport::Error),
}

/// Top-level error for fatal, construction-time failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Address(#[from] AddressParseError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// `start` was called on a manager that is already supervising.
    #[error("connection manager for [{0}] already started")]
    AlreadyStarted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_status_discards_connection() {
        let err = WorkError::from(tonic::Status::unavailable("connection reset"));
        assert!(err.discards_connection());
    }

    #[test]
    fn test_business_status_keeps_connection() {
        let err = WorkError::from(tonic::Status::not_found("no such order"));
        assert!(!err.discards_connection());
        assert!(matches!(err, WorkError::Routine(_)));
    }

    #[test]
    fn test_address_error_mentions_address() {
        let err = AddressParseError::new("grpc://", "missing host");
        assert_eq!(err.to_string(), "address [grpc://] error: missing host");
    }
}
