//! Exponential reconnection backoff.

use std::time::Duration;

/// Default maximum number of reconnection attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default backoff growth factor.
pub const DEFAULT_FACTOR: u32 = 2;

/// Default delay before the first reconnection attempt.
pub const DEFAULT_MIN_TIMEOUT_MS: u64 = 1_000;

/// Default cap on the reconnection delay.
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 8_000;

/// Reconnection policy of the signaling channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts allowed before the transport gives up.
    pub max_retries: u32,
    /// Growth factor applied per attempt.
    pub factor: u32,
    /// Delay of attempt 0.
    pub min_timeout: Duration,
    /// Upper bound on any delay.
    pub max_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            factor: DEFAULT_FACTOR,
            min_timeout: Duration::from_millis(DEFAULT_MIN_TIMEOUT_MS),
            max_timeout: Duration::from_millis(DEFAULT_MAX_TIMEOUT_MS),
        }
    }
}

impl ReconnectPolicy {
    /// `min(min_timeout * factor^attempt, max_timeout)`, saturating on overflow.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let min_ms = u64::try_from(self.min_timeout.as_millis()).unwrap_or(u64::MAX);
        u64::from(self.factor)
            .checked_pow(attempt)
            .and_then(|multiplier| min_ms.checked_mul(multiplier))
            .map_or(self.max_timeout, |ms| {
                Duration::from_millis(ms).min(self.max_timeout)
            })
    }
}

/// Attempt counter driving a [`ReconnectPolicy`].
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the cap is reached.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }
}
