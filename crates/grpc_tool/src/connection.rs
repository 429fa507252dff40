use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConfigError, DialError, DialErrorKind, Error};
use crate::keepalive::ClientKeepalive;
use crate::target::Target;
use crate::transport::{GrpcDialer, GrpcTransport};

/// Default ceiling for [`Connection::wait_until_ready`].
pub const DEFAULT_READINESS_CEILING: Duration = Duration::from_secs(60);

/// The transport's self-reported phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::TransientFailure => write!(f, "transient_failure"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A live transport channel owned by exactly one [`Connection`].
pub trait Transport: Send + Sync + 'static {
    /// Current connectivity state. Never cached by callers.
    fn state(&self) -> ConnectivityState;

    /// Observe state changes.
    fn subscribe(&self) -> watch::Receiver<ConnectivityState>;

    /// Release the transport. Called at most once by the owning connection.
    fn close(&self);
}

/// Establishes transports to a target.
pub trait Dialer: Send + Sync + 'static {
    type Transport: Transport;

    /// Dial once. Timeouts and cancellation are applied by the caller.
    fn dial(
        &self,
        target: &Target,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self::Transport, DialError>> + Send;
}

impl<D: Dialer> Dialer for Arc<D> {
    type Transport = D::Transport;

    fn dial(
        &self,
        target: &Target,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self::Transport, DialError>> + Send {
        (**self).dial(target, config)
    }
}

/// Per-connection dial settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Upper bound for one dial attempt. `None` or zero means unbounded.
    pub dial_timeout: Option<Duration>,

    pub keepalive: ClientKeepalive,

    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dial_timeout: None,
            keepalive: ClientKeepalive::default(),
            tcp_nodelay: true,
        }
    }
}

impl ConnectionConfig {
    /// Set the per-attempt dial timeout. `None` or zero disables it.
    pub fn with_dial_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.dial_timeout = timeout.into();
        self
    }

    /// Set the client keepalive policy.
    pub fn with_keepalive(mut self, keepalive: ClientKeepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set whether Nagle's algorithm is disabled on the socket.
    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// The dial timeout, with zero treated as disabled.
    pub fn effective_dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout.filter(|timeout| !timeout.is_zero())
    }

    /// Check the keepalive policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.keepalive.validate()
    }
}

/// One established transport channel to a target.
///
/// Validity is derived from the transport's connectivity state on every call. After
/// [`close`](Connection::close) every query reports invalid.
pub struct Connection<T: Transport = GrpcTransport> {
    target: Target,
    transport: T,
    closed: AtomicBool,
}

impl<T: Transport> Connection<T> {
    /// Wrap an already established transport.
    pub fn new(target: Target, transport: T) -> Self {
        Self {
            target,
            transport,
            closed: AtomicBool::new(false),
        }
    }

    /// Dial `target` through `dialer`, bounded by the configured dial timeout and
    /// abandoned as soon as `cancel` fires.
    pub async fn establish<D>(
        dialer: &D,
        target: &Target,
        config: &ConnectionConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, DialError>
    where
        D: Dialer<Transport = T>,
    {
        let limit = config.effective_dial_timeout();
        let dial = dialer.dial(target, config);
        let attempt = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, dial)
                    .await
                    .unwrap_or_else(|_| Err(DialError::new(target, DialErrorKind::Timeout(limit)))),
                None => dial.await,
            }
        };

        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DialError::new(target, DialErrorKind::Cancelled));
            }
            result = attempt => result?,
        };

        debug!(address = %target, state = %transport.state(), "Connection established");
        Ok(Self::new(target.clone(), transport))
    }

    /// The target this connection was dialed for.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The transport's current state, or `Shutdown` once closed.
    pub fn state(&self) -> ConnectivityState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectivityState::Shutdown;
        }
        self.transport.state()
    }

    /// True only while the transport reports [`ConnectivityState::Ready`].
    ///
    /// A momentary snapshot; it may be stale as soon as it returns.
    pub fn is_valid(&self) -> bool {
        self.state() == ConnectivityState::Ready
    }

    /// Block until the transport reports ready or `max_wait` elapses.
    ///
    /// Only observes; never redials. Returns early with `false` once the transport is
    /// shut down, since it can no longer become ready.
    pub async fn wait_until_ready(&self, max_wait: Duration) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut states = self.transport.subscribe();
        let outcome = tokio::time::timeout(
            max_wait,
            states.wait_for(|state| {
                matches!(
                    state,
                    ConnectivityState::Ready | ConnectivityState::Shutdown
                )
            }),
        )
        .await;

        match outcome {
            Ok(Ok(state)) => *state == ConnectivityState::Ready,
            _ => false,
        }
    }

    /// Release the transport. Further calls are no-ops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.transport.close();
            debug!(address = %self.target, "Connection closed");
        }
    }

    /// True once [`close`](Connection::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection<GrpcTransport> {
    /// Parse `address` and dial it with the gRPC transport.
    pub async fn open(address: &str, config: &ConnectionConfig) -> Result<Self, Error> {
        let target = Target::parse(address)?;
        config.validate()?;
        Ok(Self::dial(&target, config).await?)
    }

    /// Dial an already parsed target with the gRPC transport.
    pub async fn dial(target: &Target, config: &ConnectionConfig) -> Result<Self, DialError> {
        Self::establish(&GrpcDialer, target, config, &CancellationToken::new()).await
    }

    /// A channel for generated clients, or `None` once closed.
    ///
    /// Clones keep the underlying HTTP/2 connection alive until they are dropped.
    pub fn channel(&self) -> Option<tonic::transport::Channel> {
        if self.is_closed() {
            return None;
        }
        self.transport.channel()
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target.address())
            .field("state", &self.state())
            .finish()
    }
}
