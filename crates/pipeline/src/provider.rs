//! The generation-endpoint port and its error taxonomy.
//!
//! The domain defines *what* it needs from the text-generation service —
//! one structured request in, one validated JSON object out — and the
//! infrastructure crate supplies the resilient implementation. Orchestration
//! code depends only on [`LlmProvider`], never on a concrete backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::errors::RetryPolicy;
use crate::shape::ShapeTemplate;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Sampling options attached to every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    /// Sampling temperature. Kept low: scored vocabularies want
    /// consistency, not creativity.
    pub temperature: f64,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 8000,
        }
    }
}

/// One logical request to the generation endpoint: system persona, the
/// record's accumulated payload, and the stage directive.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRequest {
    /// System persona text.
    pub system: String,
    /// Compact JSON of the branch record's accumulated state.
    pub payload: String,
    /// Stage directive describing what to produce and in what shape.
    pub directive: String,
    /// Sampling options.
    pub options: SamplingOptions,
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failures of one logical request to the generation endpoint.
///
/// `Transport`, `Timeout`, `Server`, `Throttled`, `Malformed` and
/// `ShapeMismatch` classify a single attempt and are retryable within the
/// request budget. `Rejected` is terminal on first occurrence: a sub-500
/// status signals a malformed request that retrying cannot fix.
/// `TransportExhausted` and `ShapeInvalid` are the two distinct
/// budget-exhausted outcomes a caller observes.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Network-level failure (connect, TLS, mid-body disconnect).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The attempt exceeded its per-attempt timeout.
    #[error("request timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was in force for the attempt.
        timeout: Duration,
    },

    /// The endpoint answered with a 5xx status.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The endpoint throttled the request (HTTP 429).
    #[error("throttled by endpoint")]
    Throttled {
        /// Server-suggested wait, when the response carried one.
        retry_after: Option<Duration>,
    },

    /// The endpoint rejected the request with a non-throttling sub-500
    /// status. Not retried.
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The completion text could not be interpreted as a JSON object, even
    /// after salvage.
    #[error("completion is not a JSON object: {0}")]
    Malformed(String),

    /// The parsed object failed structural shape validation.
    #[error("response shape mismatch: {}", violations.join("; "))]
    ShapeMismatch {
        /// Violation paths reported by the validator.
        violations: Vec<String>,
    },

    /// The retry budget ran out on transport-class failures.
    #[error("transport retries exhausted after {attempts} attempts: {last}")]
    TransportExhausted { attempts: u32, last: String },

    /// The retry budget ran out with only validation-class failures.
    #[error("response shape still invalid after {attempts} attempts")]
    ShapeInvalid { attempts: u32 },
}

impl LlmError {
    /// Maps the error onto the cross-cutting [`RetryPolicy`].
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            LlmError::Transport(_)
            | LlmError::Timeout { .. }
            | LlmError::Server { .. }
            | LlmError::Malformed(_)
            | LlmError::ShapeMismatch { .. } => RetryPolicy::Retryable { after: None },
            LlmError::Throttled { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            LlmError::Rejected { .. }
            | LlmError::TransportExhausted { .. }
            | LlmError::ShapeInvalid { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// `true` for the validation-class failures (parse/shape), which are
    /// tracked separately so exhaustion can surface [`LlmError::ShapeInvalid`]
    /// instead of [`LlmError::TransportExhausted`].
    pub fn is_validation_class(&self) -> bool {
        matches!(self, LlmError::Malformed(_) | LlmError::ShapeMismatch { .. })
    }

    /// `true` when a timeout-class failure should grow the per-attempt
    /// timeout for the next attempt.
    pub fn is_timeout_class(&self) -> bool {
        matches!(self, LlmError::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// The port
// ---------------------------------------------------------------------------

/// Port to the text-generation service.
///
/// An implementation owns admission control, retries, backoff, timeout
/// management and shape validation; a returned `Ok` value has already been
/// validated against `expected`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Executes one logical request and returns the validated JSON object.
    async fn complete_structured(
        &self,
        request: &StructuredRequest,
        expected: &ShapeTemplate,
    ) -> Result<Value, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert_eq!(
            LlmError::Transport("reset".into()).retry_policy(),
            RetryPolicy::Retryable { after: None }
        );
        assert_eq!(
            LlmError::Server {
                status: 503,
                message: "overloaded".into()
            }
            .retry_policy(),
            RetryPolicy::Retryable { after: None }
        );
        assert_eq!(
            LlmError::Throttled {
                retry_after: Some(Duration::from_secs(2))
            }
            .retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(2))
            }
        );
    }

    #[test]
    fn terminal_classification() {
        assert_eq!(
            LlmError::Rejected {
                status: 400,
                message: "bad request".into()
            }
            .retry_policy(),
            RetryPolicy::NonRetryable
        );
        assert_eq!(
            LlmError::ShapeInvalid { attempts: 4 }.retry_policy(),
            RetryPolicy::NonRetryable
        );
    }

    #[test]
    fn validation_class_split() {
        assert!(LlmError::Malformed("prose".into()).is_validation_class());
        assert!(LlmError::ShapeMismatch { violations: vec![] }.is_validation_class());
        assert!(!LlmError::Timeout {
            timeout: Duration::from_secs(30)
        }
        .is_validation_class());
    }

    #[test]
    fn timeout_class_split() {
        assert!(LlmError::Timeout {
            timeout: Duration::from_secs(30)
        }
        .is_timeout_class());
        assert!(!LlmError::Transport("reset".into()).is_timeout_class());
    }
}
