//! Retry policies, backoff curves, and jitter sampling.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// How the delay between retries grows across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Fixed delay across all attempts.
    #[default]
    Fixed,
    /// Delay grows linearly with the attempt number.
    Linear,
    /// Delay doubles with each attempt.
    Exponential,
}

/// Uniform random source used for jitter.
///
/// A collaborator rather than a hidden RNG so tests can substitute a
/// deterministic sampler.
pub trait JitterSource: Send + Sync {
    /// Samples uniformly from `[lo, hi]`.
    fn sample(&self, lo: f64, hi: f64) -> f64;
}

/// Production sampler backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformJitter;

impl JitterSource for UniformJitter {
    fn sample(&self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        rand::thread_rng().gen_range(lo..=hi)
    }
}

/// Configuration for retry behavior of a single task.
///
/// `attempt` is 1-based everywhere: `backoff_delay(k)` is the wait before
/// attempt `k + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff: Backoff,
    max_delay: Duration,
    jitter: f64,
    retry_on: Vec<ErrorKind>,
    give_up_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Safety cap on the attempt count.
    pub const MAX_ATTEMPTS_LIMIT: u32 = 100;
    /// Safety cap on any single computed delay.
    pub const MAX_DELAY_LIMIT: Duration = Duration::from_secs(3600);

    /// No retry: a single attempt, fail immediately on error.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            retry_on: Vec::new(),
            give_up_on: Vec::new(),
        }
    }

    fn with_backoff(max_attempts: u32, delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, Self::MAX_ATTEMPTS_LIMIT),
            delay,
            backoff,
            ..Self::none()
        }
    }

    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::with_backoff(max_attempts, delay, Backoff::Fixed)
    }

    /// Linearly growing delay.
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self::with_backoff(max_attempts, delay, Backoff::Linear)
    }

    /// Exponentially growing delay.
    pub fn exponential(max_attempts: u32, delay: Duration) -> Self {
        Self::with_backoff(max_attempts, delay, Backoff::Exponential)
    }

    /// Sets the jitter fraction, clamped to `[0, 1]`.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Caps the computed delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.min(Self::MAX_DELAY_LIMIT);
        self
    }

    /// Restricts retries to the given error kinds. Empty means all kinds.
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    /// Error kinds that never retry. Wins over `retry_on`.
    pub fn give_up_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.give_up_on = kinds.into_iter().collect();
        self
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt `attempt` (1-based) may be followed by another.
    ///
    /// Cancellation is terminal: a `cancelled` failure is never retried even
    /// when `retry_on` is empty.
    pub fn should_retry(&self, attempt: u32, kind: &ErrorKind) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        if *kind == ErrorKind::Cancelled {
            return false;
        }
        if self.give_up_on.contains(kind) {
            return false;
        }
        self.retry_on.is_empty() || self.retry_on.contains(kind)
    }

    /// Computes the raw (un-jittered) delay after attempt `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .delay
                .saturating_mul(2u32.saturating_pow((attempt - 1).min(31))),
        };
        base.min(self.max_delay).min(Self::MAX_DELAY_LIMIT)
    }

    /// Computes the delay after attempt `attempt` with jitter applied.
    ///
    /// The jittered value is sampled uniformly from
    /// `[base * (1 - j), base * (1 + j)]` and clamped at zero.
    pub fn next_delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let base = self.backoff_delay(attempt);
        if self.jitter == 0.0 {
            return base;
        }
        let base_s = base.as_secs_f64();
        let lo = base_s * (1.0 - self.jitter);
        let hi = base_s * (1.0 + self.jitter);
        Duration::from_secs_f64(jitter.sample(lo, hi).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PinnedJitter(f64);

    impl JitterSource for PinnedJitter {
        fn sample(&self, _lo: f64, _hi: f64) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(100));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::linear(5, Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_monotonic_without_jitter() {
        for policy in [
            RetryPolicy::linear(10, Duration::from_millis(10)),
            RetryPolicy::exponential(10, Duration::from_millis(10)),
        ] {
            let mut last = Duration::ZERO;
            for attempt in 1..10 {
                let delay = policy.backoff_delay(attempt);
                assert!(delay >= last);
                last = delay;
            }
        }
    }

    #[test]
    fn test_max_delay_cap() {
        let policy =
            RetryPolicy::exponential(20, Duration::from_secs(10)).with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_max_attempts_clamped() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        let policy = RetryPolicy::fixed(1000, Duration::ZERO);
        assert_eq!(policy.max_attempts(), RetryPolicy::MAX_ATTEMPTS_LIMIT);
    }

    #[test]
    fn test_give_up_wins_over_retry_on() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO)
            .retry_on([ErrorKind::UserError])
            .give_up_on([ErrorKind::UserError]);
        assert!(!policy.should_retry(1, &ErrorKind::UserError));
    }

    #[test]
    fn test_empty_retry_on_matches_all() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        assert!(policy.should_retry(1, &ErrorKind::UserError));
        assert!(policy.should_retry(1, &ErrorKind::Other("rate_limited".into())));
        assert!(!policy.should_retry(3, &ErrorKind::UserError));
    }

    #[test]
    fn test_cancelled_never_retries() {
        let policy = RetryPolicy::fixed(5, Duration::ZERO);
        assert!(!policy.should_retry(1, &ErrorKind::Cancelled));
    }

    #[test]
    fn test_jitter_applies_sampler() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100)).with_jitter(0.5);
        let delay = policy.next_delay(1, &PinnedJitter(0.075));
        assert_eq!(delay, Duration::from_millis(75));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100)).with_jitter(0.1);
        for _ in 0..50 {
            let delay = policy.next_delay(1, &UniformJitter);
            assert!(delay >= Duration::from_millis(90));
            assert!(delay <= Duration::from_millis(110));
        }
    }
}
