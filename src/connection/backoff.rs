//! Reconnect backoff policy

use std::time::Duration;

/// Default base reconnect interval
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(3);
/// Default backoff cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Default automatic attempt ceiling
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff with a ceiling on attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_interval: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Automatic attempts allowed before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_BASE_INTERVAL,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): `min(base * 2^(attempt-1), cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_interval
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether another automatic attempt is allowed after `attempts`
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
