//! Per-provider token-bucket rate limiting (§4.4).

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Refills continuously at `rate_per_sec`, capped at `capacity`. `acquire`
/// waits for a token to become available up to `max_wait`, failing past
/// that point so a caller can surface `RateLimited` instead of blocking
/// forever.
pub struct TokenBucket {
    capacity: f64,
    rate_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64) -> Self {
        Self {
            capacity: rate_per_sec.max(1.0),
            rate_per_sec,
            state: Mutex::new(BucketState {
                tokens: rate_per_sec.max(1.0),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempt to acquire one token, polling until `max_wait` elapses.
    pub async fn acquire(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_tokens_up_to_capacity() {
        let bucket = TokenBucket::new(2.0);
        assert!(bucket.acquire(Duration::from_millis(10)).await);
        assert!(bucket.acquire(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn exhausted_bucket_fails_fast_when_max_wait_is_small() {
        let bucket = TokenBucket::new(1.0);
        assert!(bucket.acquire(Duration::from_millis(10)).await);
        assert!(!bucket.acquire(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let bucket = TokenBucket::new(50.0);
        assert!(bucket.acquire(Duration::from_millis(10)).await);
        for _ in 0..49 {
            bucket.acquire(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(bucket.acquire(Duration::from_millis(50)).await);
    }
}
