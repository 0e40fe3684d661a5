//! The suspension port.
//!
//! Every place the request layer waits — rate-limit refills, inter-attempt
//! backoff — suspends through a [`Pacer`] instead of calling the runtime
//! directly. The retry and admission algorithms are therefore written once;
//! production uses [`TokioPacer`], tests substitute recording or
//! virtual-clock implementations, and a blocking caller can drive the same
//! code on a current-thread runtime.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Clock and suspension backend.
#[async_trait]
pub trait Pacer: Send + Sync {
    /// Current instant, used for refill bookkeeping and elapsed-time logs.
    fn now(&self) -> Instant;

    /// Suspends the calling task for `duration`.
    async fn pause(&self, duration: Duration);
}

/// Production pacer: wall clock plus `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
