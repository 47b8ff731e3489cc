//! Structured error taxonomy for the reusable service lifecycle.
//!
//! Every abstract lifecycle operation (`activate`, `computeAsync`, `wait`, `stop`,
//! `deactivate`) runs its implementer-provided body under a single classification
//! point: cooperative cancellation is swallowed at `trace`, everything else is
//! fanned out through the service's error callback registry.

use std::fmt;

/// Which lifecycle phase produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorSource {
    Activating,
    Computing,
    Timeout,
    Waiting,
    Stopping,
    Deactivating,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSource::Activating => "ACTIVATING",
            ErrorSource::Computing => "COMPUTING",
            ErrorSource::Timeout => "TIMEOUT",
            ErrorSource::Waiting => "WAITING",
            ErrorSource::Stopping => "STOPPING",
            ErrorSource::Deactivating => "DEACTIVATING",
        };
        write!(f, "{s}")
    }
}

/// An error record fanned out to a service's error callback registry.
///
/// `cause` is stringified rather than boxed so the record stays `Clone` +
/// `Send` + `Sync`, which the callback registry's `copy()` contract requires.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServiceError {
    pub cause: String,
    pub source: ErrorSource,
    pub tag: String,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error (tag={}): {}", self.source, self.tag, self.cause)
    }
}

impl std::error::Error for ServiceError {}

impl ServiceError {
    pub fn new(cause: impl fmt::Display, source: ErrorSource, tag: impl Into<String>) -> Self {
        Self { cause: cause.to_string(), source, tag: tag.into() }
    }
}

impl crate::service::callback::CallbackInput for ServiceError {
    fn source_tag(&self) -> &str {
        &self.tag
    }
}

/// Outcome of classifying a failure that surfaced from a lifecycle operation body.
pub enum Classification {
    /// Cooperative cancellation anywhere in the cause chain: log at trace, swallow.
    Cancelled,
    /// A genuine operational failure: fan out through the error registry.
    Operational(ServiceError),
}

/// Classify a failure observed while running an operation body.
///
/// `is_cancellation` lets callers plug in whatever they use to detect
/// cooperative cancellation (a `tokio_util::sync::CancellationToken` firing,
/// a `JoinError::is_cancelled()`, an SDK-specific cancellation variant) without
/// this module depending on any one of them.
pub fn classify(cause: impl fmt::Display, source: ErrorSource, tag: impl Into<String>, is_cancellation: bool) -> Classification {
    if is_cancellation {
        Classification::Cancelled
    } else {
        Classification::Operational(ServiceError::new(cause, source, tag))
    }
}
