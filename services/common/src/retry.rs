//! Jittered exponential backoff
//!
//! Every retried operation carries a `Backoff` tracking its own budget.
//! Delays double from `base` up to `cap`, with half-jitter so concurrent
//! retries against the same upstream spread out.

use rand::Rng;
use std::time::Duration;

use crate::constants::{DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_BUDGET, DEFAULT_RETRY_CAP_MS};

/// Per-operation retry state.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    budget: u32,
    attempt: u32,
}

impl Backoff {
    /// Backoff with an explicit base delay, cap and attempt budget.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration, budget: u32) -> Self {
        Self {
            base,
            cap,
            budget,
            attempt: 0,
        }
    }

    /// Backoff with the shared defaults.
    #[must_use]
    pub const fn standard() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            Duration::from_millis(DEFAULT_RETRY_CAP_MS),
            DEFAULT_RETRY_BUDGET,
        )
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    ///
    /// The returned delay lies in `[d/2, d]` where `d = min(cap, base * 2^n)`
    /// for the n-th retry.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.budget {
            return None;
        }
        let shift = self.attempt.min(20);
        let uncapped = self.base.saturating_mul(1u32 << shift);
        let ceiling = uncapped.min(self.cap);
        self.attempt += 1;

        let ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 {
            return Some(Duration::ZERO);
        }
        let jittered = ms / 2 + rand::thread_rng().gen_range(0..=ms.div_ceil(2));
        Some(Duration::from_millis(jittered.min(ms)))
    }

    /// Attempts consumed so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// True once `next_delay` would return `None`.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.attempt >= self.budget
    }

    /// Forget consumed attempts after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_half_jitter_band() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2), 6);
        let mut ceiling = Duration::from_millis(100);
        while let Some(delay) = backoff.next_delay() {
            assert!(delay >= ceiling / 2, "{delay:?} below half of {ceiling:?}");
            assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
            ceiling = (ceiling * 2).min(Duration::from_secs(2));
        }
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn budget_exhaustion_yields_none() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(10), 2);
        assert!(backoff.next_delay().is_some());
        assert!(!backoff.exhausted());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.exhausted());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn reset_restores_the_full_budget() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(10), 1);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(10), 0);
        assert!(backoff.exhausted());
        assert!(backoff.next_delay().is_none());
    }
}
