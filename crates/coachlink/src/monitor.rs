//! Keep-alive and liveness monitoring.
//!
//! While armed, the monitor produces three kinds of ticks:
//!
//! - a liveness check every `check_interval`, which detects a channel that
//!   died without the session noticing;
//! - an advisory ping every `ping_interval`;
//! - a one-shot reconnect, once scheduled by a failed liveness check.
//!
//! Disarming drops all of them at once.
//!
//! The liveness check only backs up the channel's own drop detection: it
//! compares the channel's `connected` flag with the session state, so it
//! does not detect half-open sockets the channel still believes are live.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};

use crate::config::GatewayConfig;
use crate::session::SessionState;

/// Configuration for the liveness monitor.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Interval between liveness checks.
    pub check_interval: Duration,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// Delay before a reconnect scheduled by a failed check.
    pub reconnect_delay: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl From<&GatewayConfig> for KeepAliveConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.keep_alive.check_interval_secs),
            ping_interval: Duration::from_secs(config.keep_alive.ping_interval_secs),
            reconnect_delay: Duration::from_millis(config.reconnect.base_delay_ms),
        }
    }
}

/// What the monitor wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// Compare channel and session state.
    CheckLiveness,
    /// Send a keep-alive ping.
    Ping,
    /// Reopen the channel.
    Reconnect,
}

/// Liveness monitor timers.
#[derive(Debug)]
pub struct LivenessMonitor {
    config: KeepAliveConfig,
    check: Option<Interval>,
    ping: Option<Interval>,
    pending_reconnect: Option<Pin<Box<Sleep>>>,
}

impl LivenessMonitor {
    /// Create a disarmed monitor.
    #[must_use]
    pub const fn new(config: KeepAliveConfig) -> Self {
        Self {
            config,
            check: None,
            ping: None,
            pending_reconnect: None,
        }
    }

    /// Whether a live channel is expected but missing.
    ///
    /// True only between the channel dropping and the session handling
    /// that drop, or when a disconnect event was lost.
    #[must_use]
    pub const fn needs_reconnect(transport_connected: bool, state: SessionState) -> bool {
        !transport_connected && state.is_connected_family()
    }

    /// Start (or restart) the check and ping timers.
    pub fn arm(&mut self) {
        self.check = Some(periodic(self.config.check_interval));
        self.ping = Some(periodic(self.config.ping_interval));
    }

    /// Stop every timer, including a scheduled reconnect.
    pub fn disarm(&mut self) {
        self.check = None;
        self.ping = None;
        self.pending_reconnect = None;
    }

    /// Whether the periodic timers are running.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.check.is_some()
    }

    /// Whether a reconnect is scheduled.
    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    /// Schedule a reconnect unless one is already pending.
    ///
    /// Returns `true` if a new reconnect was scheduled.
    pub fn schedule_reconnect(&mut self) -> bool {
        if self.pending_reconnect.is_some() {
            return false;
        }
        self.pending_reconnect = Some(Box::pin(sleep(self.config.reconnect_delay)));
        true
    }

    /// Wait for the next action. Pending forever while disarmed.
    ///
    /// Cancel-safe: dropping the future loses no tick.
    pub async fn next_action(&mut self) -> MonitorAction {
        let Self {
            check,
            ping,
            pending_reconnect,
            ..
        } = self;

        let action = tokio::select! {
            () = tick(check) => MonitorAction::CheckLiveness,
            () = tick(ping) => MonitorAction::Ping,
            () = wait(pending_reconnect) => MonitorAction::Reconnect,
        };
        if action == MonitorAction::Reconnect {
            *pending_reconnect = None;
        }
        action
    }
}

fn periodic(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KeepAliveConfig {
        KeepAliveConfig {
            check_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(7),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_keep_alive_config_default() {
        let config = KeepAliveConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_needs_reconnect() {
        assert!(LivenessMonitor::needs_reconnect(false, SessionState::FullyConnected));
        assert!(LivenessMonitor::needs_reconnect(false, SessionState::AwaitingQr));
        assert!(!LivenessMonitor::needs_reconnect(true, SessionState::FullyConnected));
        assert!(!LivenessMonitor::needs_reconnect(false, SessionState::Disconnected));
        assert!(!LivenessMonitor::needs_reconnect(false, SessionState::Connecting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_ticks_in_order() {
        let mut monitor = LivenessMonitor::new(config());
        monitor.arm();
        assert!(monitor.is_armed());

        let start = Instant::now();
        assert_eq!(monitor.next_action().await, MonitorAction::CheckLiveness);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(monitor.next_action().await, MonitorAction::Ping);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(monitor.next_action().await, MonitorAction::CheckLiveness);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_stays_pending() {
        let mut monitor = LivenessMonitor::new(config());
        let result = tokio::time::timeout(Duration::from_secs(3600), monitor.next_action()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_debounced() {
        let mut monitor = LivenessMonitor::new(config());
        assert!(monitor.schedule_reconnect());
        assert!(!monitor.schedule_reconnect());
        assert!(monitor.reconnect_pending());

        assert_eq!(monitor.next_action().await, MonitorAction::Reconnect);
        assert!(!monitor.reconnect_pending());
        assert!(monitor.schedule_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_cancels_pending_reconnect() {
        let mut monitor = LivenessMonitor::new(config());
        monitor.arm();
        monitor.schedule_reconnect();
        monitor.disarm();
        assert!(!monitor.is_armed());
        assert!(!monitor.reconnect_pending());
        let result = tokio::time::timeout(Duration::from_secs(60), monitor.next_action()).await;
        assert!(result.is_err());
    }
}
