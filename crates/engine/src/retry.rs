//! Bounded retry for provider calls

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{ProviderError, RetryError};

/// Delay before retry number `attempt` (1-based): exponential, capped, plus jitter
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let backoff = policy
        .base_delay
        .saturating_mul(1u32 << exponent)
        .min(policy.max_delay);

    let base_ms = policy.base_delay.as_millis() as u64;
    let jitter = if base_ms > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..=base_ms))
    } else {
        Duration::ZERO
    };

    (backoff + jitter).min(policy.max_delay)
}

/// Run `op` until it succeeds, fails permanently, or `max_attempts` is reached
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(policy, attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(RetryError {
                    attempts: attempt,
                    source: err,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "AAPL", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Timeout)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "AAPL", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::RateLimited) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.source, ProviderError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "DELISTED", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::NotFound("DELISTED".into())) }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        };
        assert!(backoff_delay(&policy, 1) >= Duration::from_millis(500));
        assert!(backoff_delay(&policy, 1) <= Duration::from_millis(1000));
        assert_eq!(backoff_delay(&policy, 9), Duration::from_secs(5));
        assert_eq!(backoff_delay(&policy, 40), Duration::from_secs(5));
    }
}
