use std::time::Duration;

use crate::types::EngineConfig;

/// Exponential backoff policy for reconnect scheduling.
///
/// Attempt `n` waits `base * 2^n`, bounded above by the cap and below by any
/// server-provided retry-after hint.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms: base_delay_ms.max(1),
            max_delay_ms: max_delay_ms.max(base_delay_ms.max(1)),
        }
    }

    /// Derive the policy from engine tuning.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retry_base_ms, config.retry_max_ms)
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let scaled = 1_u64
            .checked_shl(attempt.min(20))
            .and_then(|multiplier| self.base_delay_ms.checked_mul(multiplier))
            .unwrap_or(self.max_delay_ms);
        let bounded = scaled
            .max(retry_after_hint_ms.unwrap_or(0))
            .min(self.max_delay_ms);
        Duration::from_millis(bounded)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::types::DEFAULT_RETRY_BASE_MS,
            crate::types::DEFAULT_RETRY_MAX_MS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_waits_the_base_delay() {
        let policy = RetryPolicy::new(250, 8_000);
        assert_eq!(
            policy.delay_for_attempt(0, None),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn doubles_per_attempt_until_cap() {
        let policy = RetryPolicy::new(100, 10_000);
        assert_eq!(
            policy.delay_for_attempt(3, None),
            Duration::from_millis(800)
        );
        assert_eq!(
            policy.delay_for_attempt(9, None),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn huge_attempt_counts_saturate_at_cap() {
        let policy = RetryPolicy::new(500, 30_000);
        assert_eq!(
            policy.delay_for_attempt(u32::MAX, None),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn server_hint_raises_the_delay_but_never_past_cap() {
        let policy = RetryPolicy::new(500, 20_000);
        assert_eq!(
            policy.delay_for_attempt(1, Some(10_000)),
            Duration::from_millis(10_000)
        );
        assert_eq!(
            policy.delay_for_attempt(1, Some(60_000)),
            Duration::from_millis(20_000)
        );
    }

    #[test]
    fn config_derivation_keeps_cap_at_least_base() {
        let mut config = EngineConfig::new("user-1");
        config.retry_base_ms = 5_000;
        config.retry_max_ms = 100;

        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_delay_ms(), 5_000);
    }
}
