//! Exponential backoff with jitter for transient provider errors (§4.4).
//!
//! Mirrors the shape of the teacher's own job-queue backoff
//! (`BACKOFF_BASE_SECS.pow(retry_count + 1)`), generalized to operate on
//! a future rather than a persisted job row and with jitter added so a
//! burst of callers don't all retry in lockstep.

use catnorm_protocol::{LlmErrorKind, METRICS};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

pub const BACKOFF_BASE_SECS: u64 = 2;

fn is_transient(error: &LlmErrorKind) -> bool {
    matches!(
        error,
        LlmErrorKind::Timeout | LlmErrorKind::RateLimited | LlmErrorKind::ProviderUnavailable
    )
}

/// Retry `attempt` up to `max_attempts` times (the first call counts as
/// attempt 1), backing off `BACKOFF_BASE_SECS.pow(n)` seconds plus up to
/// 250ms of jitter between transient failures. Non-transient errors and
/// cancellation return immediately without retrying.
pub async fn retry_with_backoff<F, Fut, T>(max_attempts: u32, mut attempt: F) -> Result<T, LlmErrorKind>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmErrorKind>>,
{
    let mut last_error = LlmErrorKind::ProviderUnavailable;
    for attempt_number in 1..=max_attempts.max(1) {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(LlmErrorKind::Cancelled) => return Err(LlmErrorKind::Cancelled),
            Err(error) => {
                let transient = is_transient(&error);
                last_error = error;
                if !transient || attempt_number == max_attempts {
                    break;
                }
                let backoff = Duration::from_secs(BACKOFF_BASE_SECS.pow(attempt_number))
                    + Duration::from_millis(rand::thread_rng().gen_range(0..250));
                METRICS.inc_llm_retries();
                tokio::time::sleep(backoff).await;
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_works() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, LlmErrorKind>(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_the_cap() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(LlmErrorKind::Timeout) }
        })
        .await;
        assert_eq!(result, Err(LlmErrorKind::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(LlmErrorKind::AuthFailed) }
        })
        .await;
        assert_eq!(result, Err(LlmErrorKind::AuthFailed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_retry_cancellation() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(LlmErrorKind::Cancelled) }
        })
        .await;
        assert_eq!(result, Err(LlmErrorKind::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
