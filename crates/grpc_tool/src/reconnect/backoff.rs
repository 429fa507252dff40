use std::time::Duration;

use rand::Rng;

use crate::error::ConfigError;

/// Delay policy between acquisition attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial: Duration,

    /// Upper bound for any delay.
    pub max: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Draw each delay uniformly from `[d/2, d]` instead of using `d` exactly.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// The same delay between every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Redial immediately. Only sensible when every dial carries its own timeout.
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Set the delay before the second attempt.
    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Set the upper bound for any delay.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Set the growth factor per attempt.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set whether delays are jittered.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reject `initial > max` and multipliers below one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial > self.max {
            return Err(ConfigError::BackoffRange {
                initial: self.initial,
                max: self.max,
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::BackoffMultiplier(self.multiplier));
        }
        Ok(())
    }
}

/// Stateful delay sequence for one run of retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Start a fresh delay sequence.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);

        if !self.config.jitter || base.is_zero() {
            return base;
        }
        let half = base / 2;
        half + Duration::from_secs_f64(rand::rng().random_range(0.0..=half.as_secs_f64()))
    }

    fn base_delay(&self) -> Duration {
        let max = self.config.max;
        let exponent = self.attempt.min(i32::MAX as u32) as i32;
        let secs = self.config.initial.as_secs_f64() * self.config.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
