//! The resilient request client.
//!
//! Wraps a [`ChatBackend`] with rate-limited admission, bounded retry,
//! exponential backoff, adaptive timeout growth, and shape validation,
//! and exposes the result as the domain's [`LlmProvider`] port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use pipeline::errors::RetryPolicy;
use pipeline::provider::{LlmError, LlmProvider, StructuredRequest};
use pipeline::shape::ShapeTemplate;

use crate::backend::ChatBackend;
use crate::pacer::{Pacer, TokioPacer};
use crate::rate_limit::RateLimiter;

/// Retry and timeout settings for one endpoint.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Extra attempts beyond the first (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Per-attempt timeout for the first attempt.
    pub base_timeout: Duration,
    /// Hard ceiling the growing per-attempt timeout never exceeds.
    pub timeout_ceiling: Duration,
    /// Backoff unit: the delay after failed attempt `k` is
    /// `min(backoff_base × 2^(k−1), backoff_cap)`.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay.
    pub backoff_cap: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_timeout: Duration::from_secs(60),
            timeout_ceiling: Duration::from_secs(120),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// One attempt's bookkeeping, used only for the backoff/timeout decisions
/// and the per-attempt log event; discarded when the request resolves.
#[derive(Debug)]
struct AttemptRecord {
    index: u32,
    timeout_used: Duration,
    outcome: &'static str,
    delay_before_next: Option<Duration>,
}

fn classification(error: &LlmError) -> &'static str {
    match error {
        LlmError::Transport(_) => "transport",
        LlmError::Timeout { .. } => "timeout",
        LlmError::Server { .. } => "server",
        LlmError::Throttled { .. } => "throttled",
        LlmError::Rejected { .. } => "rejected",
        LlmError::Malformed(_) => "malformed",
        LlmError::ShapeMismatch { .. } => "shape_mismatch",
        LlmError::TransportExhausted { .. } => "transport_exhausted",
        LlmError::ShapeInvalid { .. } => "shape_invalid",
    }
}

/// Backoff delay after failed attempt `k` (1-based).
fn backoff_delay(settings: &RetrySettings, failed_attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
    settings
        .backoff_base
        .saturating_mul(factor)
        .min(settings.backoff_cap)
}

/// Grown per-attempt timeout after a timeout-class failure.
fn grow_timeout(current: Duration, ceiling: Duration) -> Duration {
    current.mul_f64(1.5).min(ceiling)
}

/// Rate-limited, retrying client for one generation endpoint.
///
/// Holds no cross-request state beyond the backend's pooled connection.
pub struct ResilientClient {
    backend: Arc<dyn ChatBackend>,
    limiter: Arc<RateLimiter>,
    pacer: Arc<dyn Pacer>,
    settings: RetrySettings,
}

impl ResilientClient {
    /// Creates a client with the production pacer.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        limiter: Arc<RateLimiter>,
        settings: RetrySettings,
    ) -> Self {
        Self::with_pacer(backend, limiter, settings, Arc::new(TokioPacer))
    }

    /// Creates a client with an explicit suspension backend.
    pub fn with_pacer(
        backend: Arc<dyn ChatBackend>,
        limiter: Arc<RateLimiter>,
        settings: RetrySettings,
        pacer: Arc<dyn Pacer>,
    ) -> Self {
        Self {
            backend,
            limiter,
            pacer,
            settings,
        }
    }

    async fn attempt(
        &self,
        request: &StructuredRequest,
        expected: &ShapeTemplate,
        timeout: Duration,
    ) -> Result<Value, LlmError> {
        self.limiter.acquire(1).await;
        let body = self.backend.prepare(request);
        let raw = self.backend.transmit(&body, timeout).await?;
        let parsed = self.backend.parse(&raw)?;
        let violations = expected.violations(&parsed);
        if violations.is_empty() {
            Ok(parsed)
        } else {
            for path in &violations {
                warn!(backend = %self.backend.name(), path = %path, "response shape violation");
            }
            Err(LlmError::ShapeMismatch { violations })
        }
    }
}

#[async_trait]
impl LlmProvider for ResilientClient {
    async fn complete_structured(
        &self,
        request: &StructuredRequest,
        expected: &ShapeTemplate,
    ) -> Result<Value, LlmError> {
        let total_attempts = self.settings.max_retries + 1;
        let mut timeout = self.settings.base_timeout;
        let mut validation_failures = 0u32;
        let mut last_error: Option<LlmError> = None;

        for attempt in 1..=total_attempts {
            let timeout_used = timeout;
            let started = Instant::now();
            match self.attempt(request, expected, timeout_used).await {
                Ok(value) => {
                    debug!(
                        backend = %self.backend.name(),
                        attempt,
                        total_attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "request succeeded"
                    );
                    return Ok(value);
                }
                Err(error) => {
                    if matches!(error.retry_policy(), RetryPolicy::NonRetryable) {
                        warn!(
                            backend = %self.backend.name(),
                            attempt,
                            class = classification(&error),
                            error = %error,
                            "terminal failure, not retrying"
                        );
                        return Err(error);
                    }

                    if error.is_validation_class() {
                        validation_failures += 1;
                    }
                    // Timeout growth is independent of the backoff schedule.
                    if error.is_timeout_class() {
                        timeout = grow_timeout(timeout, self.settings.timeout_ceiling);
                    }

                    let delay_before_next = (attempt < total_attempts).then(|| {
                        let backoff = backoff_delay(&self.settings, attempt);
                        match error.retry_policy() {
                            RetryPolicy::Retryable { after: Some(hint) } => backoff.max(hint),
                            _ => backoff,
                        }
                    });

                    let record = AttemptRecord {
                        index: attempt,
                        timeout_used,
                        outcome: classification(&error),
                        delay_before_next,
                    };
                    warn!(
                        backend = %self.backend.name(),
                        attempt = record.index,
                        total_attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        timeout_ms = record.timeout_used.as_millis() as u64,
                        class = record.outcome,
                        delay_ms = record.delay_before_next.map(|d| d.as_millis() as u64),
                        error = %error,
                        "attempt failed"
                    );

                    if let Some(delay) = record.delay_before_next {
                        self.pacer.pause(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }

        if validation_failures == total_attempts {
            Err(LlmError::ShapeInvalid {
                attempts: total_attempts,
            })
        } else {
            Err(LlmError::TransportExhausted {
                attempts: total_attempts,
                last: last_error
                    .map(|error| error.to_string())
                    .unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::provider::SamplingOptions;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Suspension stub: records pauses, never sleeps.
    struct RecordingPacer {
        pauses: StdMutex<Vec<Duration>>,
    }

    impl RecordingPacer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pauses: StdMutex::new(Vec::new()),
            })
        }

        fn pauses(&self) -> Vec<Duration> {
            self.pauses.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Pacer for RecordingPacer {
        fn now(&self) -> Instant {
            Instant::now()
        }

        async fn pause(&self, duration: Duration) {
            self.pauses.lock().unwrap().push(duration);
        }
    }

    /// Backend double driven by a script of per-attempt outcomes; the last
    /// step repeats once the script is exhausted.
    struct ScriptedBackend {
        script: StdMutex<VecDeque<Result<Value, LlmError>>>,
        timeouts_seen: StdMutex<Vec<Duration>>,
    }

    impl ScriptedBackend {
        fn new(steps: Vec<Result<Value, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(steps.into()),
                timeouts_seen: StdMutex::new(Vec::new()),
            })
        }

        fn timeouts_seen(&self) -> Vec<Duration> {
            self.timeouts_seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn prepare(&self, _request: &StructuredRequest) -> Value {
            json!({})
        }

        async fn transmit(&self, _body: &Value, timeout: Duration) -> Result<Value, LlmError> {
            self.timeouts_seen.lock().unwrap().push(timeout);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or_else(|| Ok(json!({})))
            }
        }

        fn parse(&self, raw: &Value) -> Result<Value, LlmError> {
            Ok(raw.clone())
        }
    }

    fn request() -> StructuredRequest {
        StructuredRequest {
            system: "persona".into(),
            payload: "{}".into(),
            directive: "directive".into(),
            options: SamplingOptions::default(),
        }
    }

    fn template() -> ShapeTemplate {
        ShapeTemplate::new(json!({"answer": "sample"}))
    }

    fn matching_payload() -> Value {
        json!({"answer": "fine"})
    }

    fn settings() -> RetrySettings {
        RetrySettings {
            max_retries: 3,
            base_timeout: Duration::from_secs(60),
            timeout_ceiling: Duration::from_secs(120),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }

    fn client(
        backend: Arc<ScriptedBackend>,
        pacer: Arc<RecordingPacer>,
        settings: RetrySettings,
    ) -> ResilientClient {
        // Rate far above anything a test issues, so admission never waits.
        let limiter = Arc::new(RateLimiter::new(6_000_000.0, 1000.0, pacer.clone()));
        ResilientClient::with_pacer(backend, limiter, settings, pacer)
    }

    fn timeout_error() -> LlmError {
        LlmError::Timeout {
            timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_backoff() {
        let backend = ScriptedBackend::new(vec![Ok(matching_payload())]);
        let pacer = RecordingPacer::new();
        let client = client(backend.clone(), pacer.clone(), settings());

        let value = client
            .complete_structured(&request(), &template())
            .await
            .unwrap();
        assert_eq!(value, matching_payload());
        assert!(pacer.pauses().is_empty());
        assert_eq!(backend.timeouts_seen().len(), 1);
    }

    #[tokio::test]
    async fn backoff_schedule_is_one_two_four_and_attempts_cap_at_four() {
        let backend = ScriptedBackend::new(vec![Err(LlmError::Transport("reset".into()))]);
        let pacer = RecordingPacer::new();
        let client = client(backend.clone(), pacer.clone(), settings());

        let error = client
            .complete_structured(&request(), &template())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            LlmError::TransportExhausted { attempts: 4, .. }
        ));
        assert_eq!(backend.timeouts_seen().len(), 4);
        assert_eq!(
            pacer.pauses(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ]
        );
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        let mut cfg = settings();
        cfg.max_retries = 7;
        cfg.backoff_cap = Duration::from_secs(30);
        let backend = ScriptedBackend::new(vec![Err(LlmError::Transport("reset".into()))]);
        let pacer = RecordingPacer::new();
        let client = client(backend, pacer.clone(), cfg);

        let _ = client.complete_structured(&request(), &template()).await;
        let pauses = pacer.pauses();
        // 1, 2, 4, 8, 16, 30, 30
        assert_eq!(pauses.len(), 7);
        assert_eq!(pauses[4], Duration::from_secs(16));
        assert_eq!(pauses[5], Duration::from_secs(30));
        assert_eq!(pauses[6], Duration::from_secs(30));
    }

    #[tokio::test]
    async fn timeout_growth_is_non_decreasing_and_capped() {
        let backend = ScriptedBackend::new(vec![Err(timeout_error())]);
        let pacer = RecordingPacer::new();
        let client = client(backend.clone(), pacer, settings());

        let _ = client.complete_structured(&request(), &template()).await;
        // 60 → 90 → 120 (135 capped) → 120.
        assert_eq!(
            backend.timeouts_seen(),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(90),
                Duration::from_secs(120),
                Duration::from_secs(120),
            ]
        );
    }

    #[tokio::test]
    async fn transport_failures_leave_the_timeout_alone() {
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::Server {
                status: 503,
                message: "overloaded".into(),
            }),
            Err(LlmError::Transport("reset".into())),
            Ok(matching_payload()),
        ]);
        let pacer = RecordingPacer::new();
        let client = client(backend.clone(), pacer, settings());

        client
            .complete_structured(&request(), &template())
            .await
            .unwrap();
        assert_eq!(
            backend.timeouts_seen(),
            vec![Duration::from_secs(60); 3]
        );
    }

    #[tokio::test]
    async fn success_after_two_timeouts() {
        let backend = ScriptedBackend::new(vec![
            Err(timeout_error()),
            Err(timeout_error()),
            Ok(matching_payload()),
        ]);
        let pacer = RecordingPacer::new();
        let client = client(backend.clone(), pacer.clone(), settings());

        let value = client
            .complete_structured(&request(), &template())
            .await
            .unwrap();
        assert_eq!(value, matching_payload());
        assert_eq!(backend.timeouts_seen().len(), 3);
        assert_eq!(
            pacer.pauses(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn rejection_is_terminal_on_first_occurrence() {
        let backend = ScriptedBackend::new(vec![Err(LlmError::Rejected {
            status: 400,
            message: "bad request".into(),
        })]);
        let pacer = RecordingPacer::new();
        let client = client(backend.clone(), pacer.clone(), settings());

        let error = client
            .complete_structured(&request(), &template())
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::Rejected { status: 400, .. }));
        assert_eq!(backend.timeouts_seen().len(), 1);
        assert!(pacer.pauses().is_empty());
    }

    #[tokio::test]
    async fn pure_validation_exhaustion_surfaces_shape_invalid() {
        let backend = ScriptedBackend::new(vec![Ok(json!({"unexpected": "shape"}))]);
        let pacer = RecordingPacer::new();
        let client = client(backend.clone(), pacer, settings());

        let error = client
            .complete_structured(&request(), &template())
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::ShapeInvalid { attempts: 4 }));
        assert_eq!(backend.timeouts_seen().len(), 4);
    }

    #[tokio::test]
    async fn mixed_exhaustion_surfaces_transport_exhausted() {
        let backend = ScriptedBackend::new(vec![
            Ok(json!({"unexpected": "shape"})),
            Err(timeout_error()),
            Ok(json!({"unexpected": "shape"})),
            Err(LlmError::Transport("reset".into())),
        ]);
        let pacer = RecordingPacer::new();
        let client = client(backend, pacer, settings());

        let error = client
            .complete_structured(&request(), &template())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            LlmError::TransportExhausted { attempts: 4, .. }
        ));
    }

    #[tokio::test]
    async fn throttle_hint_raises_the_backoff_delay() {
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::Throttled {
                retry_after: Some(Duration::from_secs(9)),
            }),
            Ok(matching_payload()),
        ]);
        let pacer = RecordingPacer::new();
        let client = client(backend, pacer.clone(), settings());

        client
            .complete_structured(&request(), &template())
            .await
            .unwrap();
        // Hint (9s) beats the schedule's 1s for the first failure.
        assert_eq!(pacer.pauses(), vec![Duration::from_secs(9)]);
    }
}
