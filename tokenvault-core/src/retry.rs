use std::time::Duration;

use backon::ExponentialBuilder;

/// Bounded exponential backoff applied to idempotent vault calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: usize,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3, // total attempts = 4
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets both delay bounds.
    #[must_use]
    pub const fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    pub(crate) fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use backon::BackoffBuilder;

    use super::*;

    #[test]
    fn test_backoff_yields_max_retries_delays() {
        let policy = RetryPolicy::default()
            .with_max_retries(2)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4));
        let delays: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(delays.len(), 2);
        assert!(delays.iter().all(|delay| *delay <= Duration::from_millis(4)));
    }

    #[test]
    fn test_none_never_retries() {
        assert_eq!(RetryPolicy::none().backoff().build().count(), 0);
    }
}
