//! Backoff delay computation for the fallback loop.
//!
//! When a model fails with a retryable error, the orchestrator waits before
//! moving down the fallback chain. The wait doubles with the model's
//! accumulated error count, honors an explicit `retry-after` hint when the
//! provider sent one, and is clamped by a global ceiling so a hostile hint
//! cannot stall the request path.

use std::time::Duration;

use crate::error::{ProviderError, retry_after};

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay for the first failure (default: 500ms).
    pub base: Duration,
    /// Ceiling for the computed exponential delay (default: 5s).
    pub cap: Duration,
    /// Absolute ceiling, applied even to provider retry-after hints
    /// (default: 10s).
    pub global_cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
            global_cap: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay for the `error_count`-th consecutive failure (1-indexed):
    /// `base * 2^(error_count - 1)`, capped at [`BackoffPolicy::cap`].
    pub fn delay_for_attempt(&self, error_count: u32) -> Duration {
        let exp = 2u64.saturating_pow(error_count.saturating_sub(1));
        let raw_ms = (self.base.as_millis() as u64).saturating_mul(exp);
        Duration::from_millis(raw_ms.min(self.cap.as_millis() as u64))
    }

    /// Delay for a concrete error: the provider's explicit retry-after hint
    /// when present, otherwise the exponential delay. Either way the result
    /// is clamped by [`BackoffPolicy::global_cap`].
    pub fn delay_for(&self, err: &ProviderError, error_count: u32) -> Duration {
        let delay = retry_after(err).unwrap_or_else(|| self.delay_for_attempt(error_count));
        delay.min(self.global_cap)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base, Duration::from_millis(500));
        assert_eq!(policy.cap, Duration::from_secs(5));
        assert_eq!(policy.global_cap, Duration::from_secs(10));
    }

    #[test]
    fn exponential_growth() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(4000));
    }

    #[test]
    fn exponential_capped_at_five_seconds() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn zero_error_count_treated_as_first() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
    }

    #[test]
    fn retry_after_hint_preferred() {
        let policy = BackoffPolicy::default();
        let err = ProviderError::RateLimited {
            status: 429,
            retry_after_ms: Some(3000),
            message: String::new(),
        };
        assert_eq!(policy.delay_for(&err, 1), Duration::from_millis(3000));
    }

    #[test]
    fn global_cap_clamps_hostile_hint() {
        let policy = BackoffPolicy::default();
        let err = ProviderError::RateLimited {
            status: 429,
            retry_after_ms: Some(120_000),
            message: String::new(),
        };
        assert_eq!(policy.delay_for(&err, 1), Duration::from_secs(10));
    }

    #[test]
    fn exponential_used_without_hint() {
        let policy = BackoffPolicy::default();
        let err = ProviderError::ServerError {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(policy.delay_for(&err, 2), Duration::from_millis(1000));
    }
}
