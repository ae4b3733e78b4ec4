use std::time;

/// Backoff used between attempts to receive again after a retryable error.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
    /// Consecutive failed attempts tolerated before giving up.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts: 5,
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether another attempt may follow `attempt` consecutive failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Time to wait before retrying after `attempt` consecutive failures (1-based).
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let candidate_interval = self
            .backoff_coefficient
            .checked_pow(exponent)
            .and_then(|factor| self.initial_interval.checked_mul(factor));

        match (candidate_interval, self.maximum_interval) {
            (Some(interval), Some(max_interval)) => std::cmp::min(interval, max_interval),
            (Some(interval), None) => interval,
            (None, Some(max_interval)) => max_interval,
            (None, None) => time::Duration::MAX,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, time::Duration::from_secs(1), Some(time::Duration::from_secs(30)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backs_off_exponentially_up_to_maximum() {
        let policy = RetryPolicy::new(
            2,
            time::Duration::from_millis(100),
            Some(time::Duration::from_millis(500)),
        );

        assert_eq!(
            policy.time_until_next_retry(1),
            time::Duration::from_millis(100)
        );
        assert_eq!(
            policy.time_until_next_retry(2),
            time::Duration::from_millis(200)
        );
        assert_eq!(
            policy.time_until_next_retry(3),
            time::Duration::from_millis(400)
        );
        assert_eq!(
            policy.time_until_next_retry(4),
            time::Duration::from_millis(500)
        );
    }

    #[test]
    fn overflow_saturates_to_maximum() {
        let policy = RetryPolicy::new(
            10,
            time::Duration::from_secs(1),
            Some(time::Duration::from_secs(60)),
        );

        assert_eq!(
            policy.time_until_next_retry(40),
            time::Duration::from_secs(60)
        );
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::default().max_attempts(2);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
