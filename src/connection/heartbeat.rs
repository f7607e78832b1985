//! Heartbeat bookkeeping for stale-connection detection

use std::time::Duration;
use tokio::time::Instant;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Default stale threshold as a multiple of the interval
pub const DEFAULT_STALE_FACTOR: f64 = 2.5;
/// Shortest accepted heartbeat interval
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks the last liveness acknowledgment
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    stale_after: Duration,
    last_ack: Option<Instant>,
}

impl Heartbeat {
    /// Interval is raised to [`MIN_HEARTBEAT_INTERVAL`], the threshold to
    /// at least one interval
    pub fn new(interval: Duration, stale_after: Duration) -> Self {
        let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        Self {
            interval,
            stale_after: stale_after.max(interval),
            last_ack: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Start counting from a fresh open
    pub fn reset(&mut self, now: Instant) {
        self.last_ack = Some(now);
    }

    /// Record a pong
    pub fn record_ack(&mut self, now: Instant) {
        self.last_ack = Some(now);
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    /// Time since the last acknowledgment
    pub fn silence(&self, now: Instant) -> Duration {
        self.last_ack
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    /// Whether the peer has been silent longer than the threshold
    pub fn is_stale(&self, now: Instant) -> bool {
        self.silence(now) > self.stale_after
    }
}
