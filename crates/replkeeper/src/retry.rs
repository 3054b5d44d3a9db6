//! Retry executor with exponential backoff
//!
//! Wraps an operation with bounded attempts. Failures classified as unrecoverable
//! ([`EngineError::is_unrecoverable`]) stop the loop immediately; transient failures are retried
//! after a backoff delay that races the operation context, so cancellation is observed between
//! attempts as well as during them.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};

/// Attempts used when the caller supplies zero
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Initial delay used when the caller supplies zero
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Upper bound for a single backoff delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry configuration shared by every operation of a client
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of invocations, first attempt included
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Build a policy from caller values. Zero means "use the default".
    pub fn new(attempts: u32, delay: Duration) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: if attempts == 0 {
                defaults.max_attempts
            } else {
                attempts
            },
            base_delay: if delay.is_zero() {
                defaults.base_delay
            } else {
                delay
            },
            max_delay: defaults.max_delay.max(delay),
            ..defaults
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Run `attempt_fn` until it succeeds, fails unrecoverably, exhausts the attempts, or `ctx`
    /// stops. The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        operation: &str,
        mut attempt_fn: F,
    ) -> EngineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            ctx.check(operation)?;
            debug!(operation, attempt, max_attempts, "Starting attempt");

            let err = match ctx.run(operation, attempt_fn(attempt)).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_unrecoverable() {
                debug!(operation, attempt, error = %err, "Unrecoverable failure, not retrying");
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(operation, attempt, error = %err, "Retry attempts exhausted");
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                operation,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );

            tokio::select! {
                biased;
                interrupt = ctx.done() => {
                    return Err(ctx.interrupted(interrupt, operation, Some(err.to_string())));
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(policy.base_delay, DEFAULT_RETRY_DELAY);

        let policy = RetryPolicy::new(7, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(40), DEFAULT_MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        let ctx = OperationContext::new();

        let counter = calls.clone();
        let result: EngineResult<()> = policy
            .run(&ctx, "op", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::connection("refused"))
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Connection { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let ctx = OperationContext::new();

        let counter = calls.clone();
        let result: EngineResult<()> = policy
            .run(&ctx, "op", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::not_ready("rs0", "no primary"))
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::NotReady { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let ctx = OperationContext::new();

        let value = policy
            .run(&ctx, "op", |attempt| async move {
                if attempt < 2 {
                    Err(EngineError::connection("refused"))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_attempts() {
        let policy = RetryPolicy::new(10, Duration::from_secs(60));
        let ctx = OperationContext::new();
        let canceller = ctx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result: EngineResult<()> = policy
            .run(&ctx, "op", |_| async { Err(EngineError::connection("refused")) })
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new();
        ctx.cancel();

        let counter = calls.clone();
        let result: EngineResult<()> = RetryPolicy::default()
            .run(&ctx, "op", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
