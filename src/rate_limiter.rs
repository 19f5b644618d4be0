//! Two-dimensional request governor: a global concurrency cap plus a
//! per-model requests-per-minute cap (§4.3).
//!
//! `acquire` obtains the global permit first, then waits on the per-model
//! bucket; dropping the returned [`Permit`] returns only the global permit
//! — the bucket refills by elapsed time, never by explicit release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, OrchestratorError};

/// A simple token bucket, refilled continuously at `capacity / 60` tokens
/// per second so `capacity` corresponds to requests per minute.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

/// RAII guard returned by [`RateLimiter::acquire`]. Dropping it releases the
/// global permit; the per-model bucket is never explicitly released.
#[derive(Debug)]
pub struct Permit {
    _global: Option<OwnedSemaphorePermit>,
}

pub struct RateLimiter {
    global: Option<Arc<Semaphore>>,
    requests_per_minute: u32,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// `max_concurrent_requests == 0` disables the global cap;
    /// `rate_limit_requests_per_minute == 0` disables the per-model cap.
    pub fn new(max_concurrent_requests: usize, rate_limit_requests_per_minute: u32) -> Self {
        let global = if max_concurrent_requests == 0 {
            None
        } else {
            Some(Arc::new(Semaphore::new(max_concurrent_requests)))
        };
        Self {
            global,
            requests_per_minute: rate_limit_requests_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(
        &self,
        model_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Permit, OrchestratorError> {
        let global_permit = match &self.global {
            Some(sem) => {
                let sem = Arc::clone(sem);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(cancelled_error(model_name));
                    }
                    permit = sem.acquire_owned() => {
                        Some(permit.expect("rate limiter semaphore is never closed"))
                    }
                }
            }
            None => None,
        };

        if self.requests_per_minute == 0 {
            return Ok(Permit { _global: global_permit });
        }

        loop {
            let wait = {
                let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
                let bucket = buckets
                    .entry(model_name.to_string())
                    .or_insert_with(|| TokenBucket::new(self.requests_per_minute));
                if bucket.try_acquire() {
                    None
                } else {
                    Some(bucket.time_until_available())
                }
            };

            match wait {
                None => return Ok(Permit { _global: global_permit }),
                Some(duration) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            drop(global_permit);
                            return Err(cancelled_error(model_name));
                        }
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
            }
        }
    }
}

fn cancelled_error(model_name: &str) -> OrchestratorError {
    OrchestratorError::new(ErrorKind::Cancelled, "cancelled while acquiring rate limit permit")
        .with_model(model_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn zero_max_concurrent_disables_the_global_cap() {
        let limiter = Arc::new(RateLimiter::new(0, 0));
        let cancel = CancellationToken::new();
        let permits: Vec<_> = futures::future::join_all(
            (0..50).map(|_| limiter.acquire("m", &cancel)),
        )
        .await;
        assert!(permits.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn global_cap_limits_concurrency() {
        let limiter = Arc::new(RateLimiter::new(1, 0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let max_observed = Arc::clone(&max_observed);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire("m", &cancel).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        futures::future::join_all(handles).await;
        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_returns_cancelled_kind() {
        let limiter = RateLimiter::new(1, 0);
        let cancel = CancellationToken::new();
        let _held = limiter.acquire("m", &cancel).await.unwrap();

        cancel.cancel();
        let err = limiter.acquire("m", &cancel).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn per_model_bucket_is_independent_per_name() {
        let limiter = RateLimiter::new(0, 1);
        let cancel = CancellationToken::new();
        // Each model has its own bucket, so both can acquire once immediately.
        assert!(limiter.acquire("a", &cancel).await.is_ok());
        assert!(limiter.acquire("b", &cancel).await.is_ok());
    }
}
