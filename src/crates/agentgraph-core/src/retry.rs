//! Retry policies for node execution.
//!
//! A node's `retry` policy governs what the executor does when `execute`
//! returns an error: retry up to `max_attempts` times, waiting
//! `backoff_ms * backoff_multiplier^(attempt - 1)` between attempts, unless
//! `retry_on` says this particular error isn't worth retrying.
//!
//! ```
//! use agentgraph_core::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3).with_backoff(500, 2.0);
//! assert_eq!(policy.delay_for(1), Duration::from_millis(0));
//! assert_eq!(policy.delay_for(2), Duration::from_millis(500));
//! assert_eq!(policy.delay_for(3), Duration::from_millis(1000));
//! ```
//!
//! `retry_on` lets a node opt out of retrying errors it knows are permanent
//! (a schema validation failure, a 404) even while attempts remain:
//!
//! ```
//! use agentgraph_core::retry::RetryPolicy;
//! use agentgraph_core::error::GraphError;
//! use std::sync::Arc;
//!
//! let policy = RetryPolicy::new(5)
//!     .with_retry_on(Arc::new(|e: &GraphError| !matches!(e, GraphError::Validation(_))));
//! let permanent = GraphError::Validation("bad input".into());
//! assert!(!policy.should_retry(1, &permanent));
//! ```

use crate::error::GraphError;
use std::sync::Arc;
use std::time::Duration;

/// Returns `true` if an error is worth retrying. Defaults to "always" when a
/// node sets no predicate.
pub type RetryPredicate = Arc<dyn Fn(&GraphError) -> bool + Send + Sync>;

/// Per-node retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first, successful or not.
    pub max_attempts: u32,
    /// Base delay in milliseconds before attempt 2.
    pub backoff_ms: u64,
    /// Multiplier applied per additional attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the computed delay, if any.
    pub max_delay_ms: Option<u64>,
    /// Consulted before each retry; `None` retries every error.
    pub retry_on: Option<RetryPredicate>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff_ms", &self.backoff_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("retry_on", &self.retry_on.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: Some(30_000),
            retry_on: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff_ms: u64, multiplier: f64) -> Self {
        self.backoff_ms = backoff_ms;
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    pub fn with_retry_on(mut self, predicate: RetryPredicate) -> Self {
        self.retry_on = Some(predicate);
        self
    }

    /// Delay before the given attempt (1-indexed). Attempt 1 never waits;
    /// attempt `n` waits `backoff_ms * backoff_multiplier^(n-2)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(0);
        }
        let exponent = (attempt - 2) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let mut millis = (self.backoff_ms as f64 * factor) as u64;
        if let Some(cap) = self.max_delay_ms {
            millis = millis.min(cap);
        }
        Duration::from_millis(millis)
    }

    /// Whether attempt `attempt` just failed and another attempt should run.
    pub fn should_retry(&self, attempt: u32, error: &GraphError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match &self.retry_on {
            Some(predicate) => predicate(error),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_three_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_ms, 500);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn delay_follows_backoff_ms_times_multiplier_pow_attempt_minus_one() {
        let policy = RetryPolicy::new(5).with_backoff(100, 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(0));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(800));
    }

    #[test]
    fn max_delay_caps_growth() {
        let policy = RetryPolicy::new(10)
            .with_backoff(1_000, 2.0)
            .with_max_delay(5_000);
        assert_eq!(policy.delay_for(6), Duration::from_millis(5_000));
    }

    #[test]
    fn should_retry_bounded_by_max_attempts() {
        let policy = RetryPolicy::new(3);
        let err = GraphError::Custom("boom".into());
        assert!(policy.should_retry(1, &err));
        assert!(policy.should_retry(2, &err));
        assert!(!policy.should_retry(3, &err));
    }

    #[test]
    fn retry_on_can_reject_permanent_errors() {
        let policy = RetryPolicy::new(5)
            .with_retry_on(Arc::new(|e: &GraphError| !matches!(e, GraphError::Validation(_))));
        let permanent = GraphError::Validation("bad input".into());
        let transient = GraphError::Custom("timeout".into());
        assert!(!policy.should_retry(1, &permanent));
        assert!(policy.should_retry(1, &transient));
    }
}
