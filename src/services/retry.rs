use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Bounded retry for writes guarded only by a uniqueness constraint
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff before attempt `n + 1` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

/// Result of an idempotent upsert
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<T> {
    pub value: T,
    /// False when the row already existed (including when another writer won the race)
    pub inserted: bool,
}

impl<T> Upserted<T> {
    pub fn existing(value: T) -> Self {
        Self {
            value,
            inserted: false,
        }
    }

    pub fn inserted(value: T) -> Self {
        Self {
            value,
            inserted: true,
        }
    }
}

/// Runs `attempt` until it stops failing with a uniqueness conflict
///
/// Each attempt must re-read current state before writing, so that a retry
/// after a lost race finds the winner's row and returns it as existing.
/// Conflicts that outlast `policy.max_attempts` are surfaced; every other
/// error is returned immediately.
pub async fn optimistic_upsert<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> AppResult<Upserted<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<Upserted<T>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut tries = 0;

    loop {
        tries += 1;
        match attempt().await {
            Err(AppError::Conflict(reason)) if tries < max_attempts => {
                tracing::debug!(
                    operation,
                    attempt = tries,
                    reason = %reason,
                    "Uniqueness race, retrying"
                );
                tokio::time::sleep(policy.backoff * tries).await;
            }
            Err(AppError::Conflict(reason)) => {
                tracing::warn!(
                    operation,
                    attempts = tries,
                    reason = %reason,
                    "Uniqueness conflict persisted after retries"
                );
                return Err(AppError::Conflict(format!(
                    "{} still conflicting after {} attempts",
                    operation, tries
                )));
            }
            outcome => return outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_conflict_then_refetch_converges() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = optimistic_upsert(fast_policy(3), "like", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::Conflict("duplicate key".to_string()))
                } else {
                    Ok(Upserted::existing(42))
                }
            }
        })
        .await;

        let upserted = tokio_test::assert_ok!(result);
        assert_eq!(upserted, Upserted::existing(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_conflict_is_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<Upserted<()>> = optimistic_upsert(fast_policy(3), "like", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Conflict("duplicate key".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<Upserted<()>> = optimistic_upsert(fast_policy(5), "request", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Internal("connection reset".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
