//! The exponential backoff policy used by the outcome handler (spec
//! §4.F). Modeled on `hook_common::retry::RetryPolicy`, narrowed to the
//! fixed base-2 schedule the spec pins down for testability (spec §9:
//! "the deterministic schedule is what tests assert — make jitter
//! opt-in").

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Base of the exponential backoff; spec default is 2.
    base_delay: Duration,
    /// Optional jitter fraction in `[0, 1)` applied multiplicatively to
    /// the computed delay. Zero by default, i.e. the deterministic
    /// schedule spec §8 scenario 6 asserts.
    jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            jitter_fraction: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            jitter_fraction: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction.clamp(0.0, 1.0);
        self
    }

    /// Backoff after the `retry_count`-th failed attempt: `base_delay *
    /// 2^retry_count`, using the *new* retry count (i.e. counted after
    /// the increment), giving 2s, 4s, 8s, 16s, 32s... for a 1s base
    /// delay. See spec §4.F and §9.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.max(0) as u32;
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));

        if self.jitter_fraction == 0.0 {
            return base;
        }

        // Jitter is opt-in and deterministic tests never enable it;
        // when enabled, scale within [1 - j, 1] so backoff never grows
        // past the un-jittered schedule.
        let factor = 1.0 - self.jitter_fraction * fastrand_like_fraction(retry_count);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

/// A tiny, dependency-free pseudo-random fraction in `[0, 1)` derived
/// from the retry count. Not a general-purpose RNG — only used to vary
/// opt-in jitter deterministically across attempts without pulling in a
/// `rand` dependency nothing else in this crate needs.
fn fastrand_like_fraction(seed: i32) -> f64 {
    let x = (seed.wrapping_mul(2654435761) as u32) as f64;
    (x % 1000.0) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_base_two_schedule() {
        let policy = RetryPolicy::new(Duration::from_secs(1));

        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
    }

    #[test]
    fn jitter_never_exceeds_the_unjittered_schedule() {
        let policy = RetryPolicy::new(Duration::from_secs(1)).with_jitter(0.2);
        for retry_count in 1..6 {
            assert!(policy.backoff(retry_count) <= RetryPolicy::default().backoff(retry_count));
        }
    }
}
