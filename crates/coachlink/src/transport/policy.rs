//! Reconnection backoff and endpoint failover.

use std::time::{Duration, Instant};

use crate::config::ReconnectSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single retry delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated per endpoint before failing over.
    pub max_attempts: u32,
    /// Bound on a single connection handshake.
    pub handshake_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_attempts: settings.max_attempts.max(1),
            handshake_timeout: Duration::from_secs(settings.handshake_timeout_secs),
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for the given (1-based) attempt number.
    ///
    /// `delay = min(base * 2^(attempt - 1), max)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Which configured endpoint an attempt targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSlot {
    /// The primary endpoint.
    Primary,
    /// The secondary (failover) endpoint.
    Secondary,
}

impl EndpointSlot {
    fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Consecutive failures against the endpoint that just failed.
    pub failures: u32,
    /// Delay before the next attempt.
    pub delay: Duration,
    /// Endpoint the next attempt targets.
    pub next: EndpointSlot,
    /// Set when the failed endpoint used up its attempt budget.
    pub exhausted: Option<EndpointSlot>,
}

/// Tracks consecutive failures and the endpoint currently in use.
///
/// After `max_attempts` consecutive failures the policy switches to the other
/// endpoint, resets its counter and keeps alternating for as long as failures
/// continue. Once an endpoint has been exhausted, retries run at `max_delay`
/// cadence until a connection succeeds. Without a secondary endpoint the
/// policy stays on the primary.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    has_secondary: bool,
    current: EndpointSlot,
    attempt_count: u32,
    exhausted_rounds: u32,
    last_attempt_at: Option<Instant>,
}

impl ReconnectPolicy {
    /// Create a policy starting on the primary endpoint.
    #[must_use]
    pub fn new(config: ReconnectConfig, has_secondary: bool) -> Self {
        Self {
            config,
            has_secondary,
            current: EndpointSlot::Primary,
            attempt_count: 0,
            exhausted_rounds: 0,
            last_attempt_at: None,
        }
    }

    /// Endpoint the next attempt should target.
    #[must_use]
    pub const fn current(&self) -> EndpointSlot {
        self.current
    }

    /// Consecutive failures against the current endpoint.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// When the last attempt started.
    #[must_use]
    pub const fn last_attempt_at(&self) -> Option<Instant> {
        self.last_attempt_at
    }

    /// Handshake bound for a single attempt.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        self.config.handshake_timeout
    }

    /// Note that an attempt is starting.
    pub fn record_attempt(&mut self) {
        self.last_attempt_at = Some(Instant::now());
    }

    /// Note a successful connection. Resets the failure counter.
    pub fn record_success(&mut self) {
        self.attempt_count = 0;
        self.exhausted_rounds = 0;
    }

    /// Note a failed attempt or a dropped connection.
    pub fn record_failure(&mut self) -> FailureOutcome {
        self.attempt_count += 1;
        let failures = self.attempt_count;

        let mut delay = if self.exhausted_rounds > 0 {
            self.config.max_delay
        } else {
            self.config.delay_for_attempt(failures)
        };

        let mut exhausted = None;
        if failures >= self.config.max_attempts {
            exhausted = Some(self.current);
            if self.has_secondary {
                self.current = self.current.other();
            }
            self.attempt_count = 0;
            self.exhausted_rounds = self.exhausted_rounds.saturating_add(1);
            delay = self.config.max_delay;
        }

        FailureOutcome {
            failures,
            delay,
            next: self.current,
            exhausted,
        }
    }
}
