//! Retry policy for decision provider calls.

use std::time::Duration;

use crate::model::ModelError;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter: 0.1,
        }
    }

    /// Zero delay between attempts.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1.0).with_jitter(0.0)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base =
            self.initial.as_millis() as f64 * self.factor.powi(attempt.saturating_sub(1) as i32);
        let clamped = base.min(self.max.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let range = clamped * self.jitter;
            let offset = rand::random::<f64>() * range * 2.0 - range;
            (clamped + offset).max(0.0)
        } else {
            clamped
        };

        Duration::from_millis(jittered as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: ExponentialBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// A server-supplied `retry-after` wins over the computed backoff, up to
    /// the backoff ceiling.
    pub fn delay_for(&self, attempt: u32, error: &ModelError) -> Duration {
        let computed = self.backoff.delay_for(attempt);
        match error.retry_after() {
            Some(hint) => hint.min(self.backoff.max.max(computed)),
            None => computed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 2.0)
                .with_jitter(0.0);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_ceiling() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500), 2.0)
                .with_jitter(0.0);
        assert_eq!(backoff.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_after_hint() {
        let policy = RetryPolicy::default().with_backoff(
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5), 2.0)
                .with_jitter(0.0),
        );
        let limited = ModelError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(1, &limited), Duration::from_secs(2));

        let huge = ModelError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(policy.delay_for(1, &huge), Duration::from_secs(5));
    }

    #[test]
    fn test_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts(), 4);
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
        assert_eq!(ExponentialBackoff::immediate().delay_for(3), Duration::ZERO);
    }
}
