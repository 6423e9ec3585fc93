use crate::error::{LensGraphError, Result};
use crate::fetch::QueryShape;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Pacing and retry policy for one query shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchPolicy {
    /// Minimum gap between two requests to the upstream. Default: 1200ms (50/min).
    pub min_interval_ms: u64,

    /// Retries of the same page after a retryable failure. Default: 3.
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry. Default: 5000ms.
    pub base_delay_ms: u64,

    /// Backoff ceiling before jitter. Default: 60000ms.
    pub max_delay_ms: u64,

    /// Extra random delay, as a fraction of the backoff delay. Default: 0.25.
    pub jitter_ratio: f64,

    /// Per-call timeout. A timeout is retried like a rate limit. Default: 30000ms.
    pub request_timeout_ms: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_200,
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.25,
            request_timeout_ms: 30_000,
        }
    }
}

impl FetchPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// No pacing, no backoff delay. For tests and local replays.
    pub fn immediate() -> Self {
        Self {
            min_interval_ms: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ratio: 0.0,
            ..Self::default()
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max_delay`, plus up to `jitter_ratio` of that. A server
    /// supplied `retry_after` is honoured when it is longer.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exp_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        let jitter_max = exp_ms as f64 * self.jitter_ratio.max(0.0);
        let jitter_ms = if jitter_max > 0.0 {
            rand::thread_rng().gen_range(0.0..=jitter_max)
        } else {
            0.0
        };

        let delay = Duration::from_millis(exp_ms) + Duration::from_secs_f64(jitter_ms / 1000.0);
        match retry_after {
            Some(wait) if wait > delay => wait,
            _ => delay,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(LensGraphError::Validation(
                "request_timeout_ms must be > 0".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(LensGraphError::Validation(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(LensGraphError::Validation(format!(
                "jitter_ratio {} out of range [0.0, 1.0]",
                self.jitter_ratio
            )));
        }
        Ok(())
    }
}

/// Fetcher configuration: a default policy plus per-shape overrides keyed by
/// [`QueryShape::policy_key`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Items requested per page. Default: 50.
    pub page_size: usize,

    /// Policy for shapes without an override.
    pub policy: FetchPolicy,

    /// Overrides, e.g. `[fetch.shapes.references]`.
    pub shapes: BTreeMap<String, FetchPolicy>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            policy: FetchPolicy::default(),
            shapes: BTreeMap::new(),
        }
    }
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_shape_policy(mut self, key: &str, policy: FetchPolicy) -> Self {
        self.shapes.insert(key.to_string(), policy);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn policy_for(&self, shape: &QueryShape) -> &FetchPolicy {
        self.shapes.get(shape.policy_key()).unwrap_or(&self.policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(LensGraphError::Validation("page_size must be > 0".into()));
        }
        self.policy.validate()?;
        for (key, policy) in &self.shapes {
            if !matches!(key.as_str(), "accounts" | "posts" | "following" | "references") {
                return Err(LensGraphError::Validation(format!(
                    "unknown query shape '{}' in fetch policy overrides",
                    key
                )));
            }
            policy.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = FetchPolicy {
            base_delay_ms: 100,
            max_delay_ms: 500,
            jitter_ratio: 0.0,
            ..FetchPolicy::default()
        };
        assert_eq!(policy.backoff_delay(0, None), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1, None), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2, None), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3, None), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(70, None), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = FetchPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter_ratio: 0.5,
            ..FetchPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.backoff_delay(0, None);
            assert!(d >= Duration::from_millis(1_000));
            assert!(d <= Duration::from_millis(1_501));
        }
    }

    #[test]
    fn test_retry_after_wins_when_longer() {
        let policy = FetchPolicy::immediate();
        let wait = Duration::from_secs(7);
        assert_eq!(policy.backoff_delay(0, Some(wait)), wait);
    }

    #[test]
    fn test_shape_override_lookup() {
        let slow = FetchPolicy::immediate().with_min_interval(Duration::from_secs(3));
        let config = FetchConfig::new().with_shape_policy("references", slow.clone());
        let refs = QueryShape::References { post: "p".into() };
        assert_eq!(config.policy_for(&refs), &slow);
        assert_eq!(config.policy_for(&QueryShape::Posts), &FetchPolicy::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(FetchConfig::new().with_page_size(0).validate().is_err());
        let bad = FetchConfig::new().with_shape_policy("likes", FetchPolicy::default());
        assert!(bad.validate().is_err());
        assert!(FetchConfig::default().validate().is_ok());
    }
}
