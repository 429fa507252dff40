use std::time::Duration;

use crate::connection::{ConnectionConfig, DEFAULT_READINESS_CEILING};
use crate::error::ConfigError;
use crate::reconnect::backoff::BackoffConfig;

/// Configuration for an [`AutoReconnectingConnection`](super::AutoReconnectingConnection).
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Settings applied to every dial.
    pub connection: ConnectionConfig,

    /// Delay policy between acquisition attempts.
    pub backoff: BackoffConfig,

    /// How long a reconnect request waits for the current connection to become ready.
    pub readiness_ceiling: Duration,

    /// Start a fresh acquisition when a reconnect request's readiness wait times out.
    pub redial_on_failed_wait: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            backoff: BackoffConfig::default(),
            readiness_ceiling: DEFAULT_READINESS_CEILING,
            redial_on_failed_wait: false,
        }
    }
}

impl ReconnectConfig {
    /// Set the settings applied to every dial.
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Shorthand for setting the per-attempt dial timeout.
    pub fn with_dial_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connection.dial_timeout = timeout.into();
        self
    }

    /// Set the delay policy between acquisition attempts.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set how long a reconnect request waits for readiness.
    pub fn with_readiness_ceiling(mut self, ceiling: Duration) -> Self {
        self.readiness_ceiling = ceiling;
        self
    }

    /// Set whether a failed readiness wait starts a fresh acquisition.
    pub fn with_redial_on_failed_wait(mut self, redial: bool) -> Self {
        self.redial_on_failed_wait = redial;
        self
    }

    /// Check the ceiling, the dial settings and the backoff policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.readiness_ceiling.is_zero() {
            return Err(ConfigError::Zero("readiness ceiling"));
        }
        self.connection.validate()?;
        self.backoff.validate()
    }
}
