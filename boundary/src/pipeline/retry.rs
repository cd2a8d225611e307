//! Bounded retry with backoff for transient stage failures.
//!
//! Only [`ErrorKind::Transient`](crate::errors::ErrorKind) failures are
//! retried. A deterministic failure is returned on the first attempt.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::errors::{BoundaryError, ErrorKind};

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// How often, and how patiently, a stage is re-invoked after a transient
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.backoff {
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exponent)).min(max)
            }
            BackoffStrategy::Linear => {
                let factor = u64::try_from(attempt).unwrap_or(u64::MAX).saturating_add(1);
                base.saturating_mul(factor).min(max)
            }
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Attempts exhausted.
    GiveUp,
    /// The failure is deterministic.
    NotRetryable,
}

/// Attempt counter for one stage.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: usize,
}

impl RetryState {
    /// Creates a fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed attempt and decides what to do next.
    pub fn on_failure(&mut self, policy: &RetryPolicy, error: &BoundaryError) -> RetryDecision {
        self.attempts += 1;

        if !error.is_transient() {
            return RetryDecision::NotRetryable;
        }
        if self.attempts >= policy.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(policy.delay_for(self.attempts - 1))
    }
}

/// Runs `operation` until it succeeds, fails deterministically, or the
/// policy's attempts are exhausted. The returned error carries the number
/// of attempts in its context. A transient error that used up the budget
/// comes back as deterministic, with its original kind under
/// `original_kind`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    key: &str,
    mut operation: F,
) -> Result<T, BoundaryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BoundaryError>>,
{
    let mut state = RetryState::new();

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match state.on_failure(policy, &error) {
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        stage = key,
                        attempt = state.attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    tracing::error!(stage = key, attempts = state.attempts, "Retry budget exhausted");
                    let original_kind = error.kind.type_name();
                    let mut error = error
                        .with_context_entry("attempts", state.attempts)
                        .with_context_entry("original_kind", original_kind);
                    error.kind = ErrorKind::Deterministic;
                    return Err(error);
                }
                RetryDecision::NotRetryable => {
                    return Err(error.with_context_entry("attempts", state.attempts));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.backoff, BackoffStrategy::Exponential);
        assert_eq!(policy.jitter, JitterStrategy::Full);
    }

    #[test]
    fn test_policy_deserializes_partial() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5, "backoff": "linear"}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, BackoffStrategy::Linear);
        assert_eq!(policy.max_delay_ms, 30000);
    }

    #[test]
    fn test_delay_exponential_no_jitter() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_linear_and_constant() {
        let linear = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let constant = linear.with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);

        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);

        for _ in 0..10 {
            assert!(policy.delay_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_deterministic_not_retryable() {
        let mut state = RetryState::new();
        let decision = state.on_failure(&fast(), &BoundaryError::deterministic("bad"));
        assert_eq!(decision, RetryDecision::NotRetryable);
        assert_eq!(state.attempts, 1);
    }

    #[test]
    fn test_transient_exhausts() {
        let policy = fast().with_max_attempts(2);
        let mut state = RetryState::new();
        let err = BoundaryError::transient("timeout");

        assert!(matches!(state.on_failure(&policy, &err), RetryDecision::Retry(_)));
        assert_eq!(state.on_failure(&policy, &err), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast().with_max_attempts(5), "probe", || {
            let c = counter.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BoundaryError::transient("connection reset"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&fast().with_max_attempts(3), "probe", || {
            let c = counter.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(BoundaryError::transient("timeout"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.is_deterministic());
        assert_eq!(err.message, "timeout");
        assert_eq!(err.context.get("attempts"), Some(&serde_json::json!(3)));
        assert_eq!(err.context.get("original_kind"), Some(&serde_json::json!("TransientError")));
    }

    #[tokio::test]
    async fn test_with_retry_never_retries_deterministic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&fast().with_max_attempts(5), "probe", || {
            let c = counter.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(BoundaryError::deterministic("mismatch"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
