use std::time::Duration;

use rand::Rng;

use crate::pipeline::PipelineTuning;

/// Exponential backoff with jitter for event-level retries. The retry count
/// lives in the event payload, not in Kafka redelivery, so the policy only
/// computes delays; re-emission is the pipeline's job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_tuning(tuning: &PipelineTuning) -> Self {
        Self {
            max_attempts: tuning.max_retries,
            base_delay: Duration::from_secs(tuning.retry_base_delay_secs),
            multiplier: tuning.retry_multiplier,
            max_delay: Duration::from_secs(tuning.retry_max_delay_secs),
            jitter_ratio: tuning.retry_jitter_ratio,
        }
    }

    /// Whether another attempt is allowed after `retry_count` failures.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_attempts
    }

    /// Delay before attempt `retry_count + 1`, jittered by the configured
    /// ratio. Attempt 0 waits `base_delay`, each further attempt multiplies,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(retry_count.min(16));
        let raw = self
            .base_delay
            .saturating_mul(u32::try_from(factor.min(u64::from(u32::MAX))).unwrap_or(u32::MAX));
        let capped = raw.min(self.max_delay);

        if self.jitter_ratio <= f64::EPSILON || capped.is_zero() {
            return capped;
        }

        let spread = capped.as_secs_f64() * self.jitter_ratio;
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.1,
        }
    }

    #[test]
    fn budget_is_max_attempts() {
        let policy = policy();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn delays_grow_exponentially_within_jitter_bounds() {
        let policy = policy();
        for (attempt, expected_secs) in [(0_u32, 2.0_f64), (1, 4.0), (2, 8.0)] {
            let delay = policy.delay_for(attempt).as_secs_f64();
            let low = expected_secs * 0.9;
            let high = expected_secs * 1.1;
            assert!(
                (low..=high).contains(&delay),
                "attempt {attempt}: delay {delay}s outside [{low}, {high}]"
            );
        }
    }

    #[test]
    fn delay_is_capped_at_max() {
        let mut policy = policy();
        policy.jitter_ratio = 0.0;
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn zero_base_delay_stays_zero() {
        let mut policy = policy();
        policy.base_delay = Duration::ZERO;
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }
}
