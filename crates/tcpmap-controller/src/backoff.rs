//! Per-mapping exponential backoff for failed reconciles
//!
//! The error policy asks for the next delay each time a reconcile fails; a
//! successful reconcile resets the counter so the next failure starts over
//! at the initial delay.

use std::time::Duration;

use dashmap::DashMap;

/// Backoff schedule applied to failed reconciles
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2,
        }
    }
}

impl BackoffConfig {
    /// Delay for the given number of consecutive failures (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = self.multiplier.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Consecutive failure counts keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct Backoff {
    config: BackoffConfig,
    failures: DashMap<String, u32>,
}

impl Backoff {
    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut count = self.failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        self.config.delay_for(*count)
    }

    /// Forget failures for `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..9)
            .map(|_| backoff.next_delay("apps/db").as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300, 300]);
    }

    #[test]
    fn success_resets_the_schedule() {
        let backoff = Backoff::default();
        backoff.next_delay("apps/db");
        assert_eq!(backoff.next_delay("apps/db"), Duration::from_secs(10));

        backoff.reset("apps/db");
        assert_eq!(backoff.next_delay("apps/db"), Duration::from_secs(5));
    }

    #[test]
    fn mappings_back_off_independently() {
        let backoff = Backoff::default();
        backoff.next_delay("apps/db");
        backoff.next_delay("apps/db");
        assert_eq!(backoff.next_delay("apps/cache"), Duration::from_secs(5));
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(300));
    }
}
