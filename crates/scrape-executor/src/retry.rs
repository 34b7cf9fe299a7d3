use std::time::Duration;

use rand::Rng;

/// Backoff policy for retrying a job after a retryable fetch failure. The
/// job itself carries `delay_between_retries_secs` as its base interval;
/// this layers a capped exponential backoff and a small jitter on top so a
/// burst of jobs hitting the same flaky origin don't all wake up and retry
/// in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff_coefficient: u32,
    pub maximum_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            backoff_coefficient: 2,
            maximum_interval: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// `attempt` is the retry_count *after* incrementing (so the first
    /// retry is attempt 1). `base` is the job's configured
    /// `delay_between_retries_secs`, used as the attempt-1 interval.
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let scaled = base.saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));
        let capped = std::cmp::min(scaled, self.maximum_interval);
        jitter(capped)
    }
}

/// +/-10% jitter, never negative, never below a millisecond floor.
fn jitter(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let spread = (base.as_millis() as f64) * 0.1;
    let delta = rand::thread_rng().gen_range(-spread..=spread);
    let millis = (base.as_millis() as f64 + delta).max(0.0);
    Duration::from_millis(millis as u64)
}
