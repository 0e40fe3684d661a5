//! Top-level error and retry-policy types for the taraflow analysis domain.
//!
//! [`TaraError`] covers the conditions that halt a run outright. Component
//! errors (request-layer failures, stage failures) live in their respective
//! modules; any error type that participates in retry decisions produces a
//! [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the request layer decide
/// whether to re-attempt an operation without escalating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally carries a server-suggested minimum delay (e.g.
    /// from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means the
        /// caller applies its own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Errors that halt the entire run rather than isolating to one branch.
///
/// Everything else — transport trouble, invalid responses, stage failures —
/// is caught at the branch boundary and reported as a failed branch; a run
/// still completes and reports counts under partial failure.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum TaraError {
    /// Pre-pipeline failure, e.g. the asset inventory cannot be read.
    ///
    /// The single condition that stops the run with a non-zero status.
    #[error("Run aborted: {reason}")]
    RunAborted {
        /// Human-readable description of why the run could not start.
        reason: String,
    },

    /// The run configuration is invalid.
    ///
    /// Produced at load time; the pipeline never starts with an invalid
    /// configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_roundtrips_through_serde() {
        let policy = RetryPolicy::Retryable {
            after: Some(Duration::from_secs(7)),
        };
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn run_aborted_display() {
        let err = TaraError::RunAborted {
            reason: "asset inventory unreadable".into(),
        };
        assert_eq!(err.to_string(), "Run aborted: asset inventory unreadable");
    }
}
