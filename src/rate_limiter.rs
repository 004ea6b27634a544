use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

/// Per-source request budget: a requests-per-minute token bucket plus a cap on
/// simultaneous in-flight requests.
#[derive(Clone, Debug, Default)]
pub struct Limits {
    pub requests_per_min: Option<u64>,
    pub concurrency: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limits: Limits,
    // token bucket modeled by the time of last refill and the current tokens
    rpm_tokens: Mutex<(f64, Instant)>,
    sem: Option<Semaphore>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        let now = Instant::now();
        let rpm_capacity = limits.requests_per_min.unwrap_or(0) as f64;
        let sem = limits.concurrency.map(|c| Semaphore::new(c as usize));
        Self {
            inner: Arc::new(Inner {
                limits,
                rpm_tokens: Mutex::new((rpm_capacity, now)),
                sem,
            }),
        }
    }

    // Acquire permission for one request. Awaits as needed.
    pub async fn acquire(&self) -> RequestPermit<'_> {
        let permit = if let Some(sem) = &self.inner.sem {
            Some(sem.acquire().await.expect("semaphore closed"))
        } else {
            None
        };

        if let Some(rpm) = self.inner.limits.requests_per_min {
            if rpm > 0 {
                self.consume_token(rpm as f64).await;
            }
        }
        RequestPermit { _permit: permit }
    }

    async fn consume_token(&self, capacity: f64) {
        // Basic token bucket: refill continuously, wait until a token accumulates
        loop {
            let mut guard = self.inner.rpm_tokens.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            let refill_rate = capacity / 60.0; // tokens per second
            *tokens = (*tokens + elapsed * refill_rate).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                break;
            } else {
                let need = 1.0 - *tokens;
                let secs = need / refill_rate;
                drop(guard);
                tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
            }
        }
    }
}

/// Held for the duration of the request; releases the concurrency slot on drop.
pub struct RequestPermit<'a> {
    _permit: Option<tokio::sync::SemaphorePermit<'a>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_acquire_is_immediate() {
        let limiter = RateLimiter::new(Limits::default());
        let start = Instant::now();
        for _ in 0..10 {
            let _permit = limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn concurrency_cap_bounds_inflight_requests() {
        let limiter = RateLimiter::new(Limits {
            requests_per_min: None,
            concurrency: Some(2),
        });
        let a = limiter.acquire().await;
        let _b = limiter.acquire().await;
        // Third acquire must wait until a permit is released.
        let pending = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(pending.is_err());
        drop(a);
        let granted = tokio::time::timeout(Duration::from_millis(200), limiter.acquire()).await;
        assert!(granted.is_ok());
    }
}
