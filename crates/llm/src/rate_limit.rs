//! Token-bucket admission control, shared by every request to one endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::pacer::Pacer;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket gating request admission.
///
/// The bucket starts full. On every acquisition attempt the elapsed time
/// since the last refill is converted into tokens (capped at the burst
/// capacity) inside one critical section covering check, refill and debit.
/// The wait for a refill happens *outside* that critical section, and the
/// whole acquisition is re-run afterwards because concurrent acquirers may
/// have drained the balance in the meantime. Waiters are not served in
/// FIFO order; the only guarantee is eventual progress.
pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    bucket: Mutex<Bucket>,
    pacer: Arc<dyn Pacer>,
}

impl RateLimiter {
    /// Creates a limiter refilling at `tokens_per_minute` with the given
    /// burst capacity (clamped to at least one token).
    pub fn new(tokens_per_minute: f64, burst_capacity: f64, pacer: Arc<dyn Pacer>) -> Self {
        let capacity = burst_capacity.max(1.0);
        Self {
            capacity,
            refill_per_second: tokens_per_minute / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: pacer.now(),
            }),
            pacer,
        }
    }

    /// Suspends until `permits` tokens are available, then debits them.
    ///
    /// Requests larger than the burst capacity are clamped to it, so an
    /// oversized acquisition still makes progress.
    pub async fn acquire(&self, permits: u32) {
        let need = f64::from(permits).min(self.capacity);
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = self.pacer.now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                if elapsed > 0.0 {
                    bucket.tokens =
                        (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
                    bucket.last_refill = now;
                }
                if bucket.tokens >= need {
                    bucket.tokens -= need;
                    return;
                }
                Duration::from_secs_f64((need - bucket.tokens) / self.refill_per_second)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting for refill");
            self.pacer.pause(wait).await;
        }
    }

    #[cfg(test)]
    async fn available(&self) -> f64 {
        self.bucket.lock().await.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Virtual clock: `pause` advances `now` instead of sleeping.
    struct ManualPacer {
        now: StdMutex<Instant>,
        pauses: StdMutex<Vec<Duration>>,
    }

    impl ManualPacer {
        fn new() -> Self {
            Self {
                now: StdMutex::new(Instant::now()),
                pauses: StdMutex::new(Vec::new()),
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }

        fn pauses(&self) -> Vec<Duration> {
            self.pauses.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Pacer for ManualPacer {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }

        async fn pause(&self, duration: Duration) {
            self.pauses.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }

    fn limiter(rate_per_minute: f64, burst: f64) -> (Arc<ManualPacer>, RateLimiter) {
        let pacer = Arc::new(ManualPacer::new());
        let limiter = RateLimiter::new(rate_per_minute, burst, pacer.clone());
        (pacer, limiter)
    }

    #[tokio::test]
    async fn burst_is_served_without_waiting() {
        let (pacer, limiter) = limiter(60.0, 5.0);
        for _ in 0..5 {
            limiter.acquire(1).await;
        }
        assert!(pacer.pauses().is_empty());
        assert!(limiter.available().await < 1.0);
    }

    #[tokio::test]
    async fn drained_bucket_waits_for_exact_refill() {
        // 60/minute = 1 token per second.
        let (pacer, limiter) = limiter(60.0, 2.0);
        limiter.acquire(2).await;
        limiter.acquire(1).await;
        let pauses = pacer.pauses();
        assert_eq!(pauses.len(), 1);
        assert!((pauses[0].as_secs_f64() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn tokens_never_exceed_capacity() {
        let (pacer, limiter) = limiter(600.0, 3.0);
        // A long idle period must not overfill the bucket.
        pacer.advance(Duration::from_secs(3600));
        limiter.acquire(1).await;
        assert!(limiter.available().await <= 3.0);
        assert!((limiter.available().await - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn tokens_never_go_negative() {
        let (_pacer, limiter) = limiter(60.0, 1.0);
        for _ in 0..3 {
            limiter.acquire(1).await;
            assert!(limiter.available().await >= 0.0);
        }
    }

    #[tokio::test]
    async fn oversized_request_is_clamped_to_capacity() {
        let (pacer, limiter) = limiter(60.0, 2.0);
        limiter.acquire(10).await;
        // Served as a full-burst acquisition rather than waiting forever.
        assert!(pacer.pauses().is_empty());
    }

    #[tokio::test]
    async fn concurrent_acquirers_share_the_budget() {
        let pacer = Arc::new(ManualPacer::new());
        let limiter = Arc::new(RateLimiter::new(6000.0, 4.0, pacer.clone()));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let limiter = limiter.clone();
            tasks.spawn(async move { limiter.acquire(1).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
        let available = limiter.available().await;
        assert!((0.0..=4.0).contains(&available));
    }
}
