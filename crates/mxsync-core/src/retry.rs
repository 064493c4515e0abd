use std::time::Duration;

/// Exponential backoff used between failed long-poll attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// A server-supplied `retry_after` hint wins when it is larger than the
    /// computed backoff; the result never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let multiplier = 1_u32 << attempt.min(20);
        let calculated = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        calculated
            .max(retry_after.unwrap_or(Duration::ZERO))
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}
