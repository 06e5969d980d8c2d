//! Error taxonomy for event processing
//!
//! Every error is handled at the boundary of the single event being
//! processed; no variant here is allowed to affect any other event or
//! repository.

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Errors raised while processing one inbound event
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Malformed or unauthenticated inbound payload; permanently rejected
    #[error("failed to parse payload: {0}")]
    Payload(String),

    /// No repository is registered for the event's URL; delivery dropped
    #[error("no repository registered for {0}")]
    UnregisteredRepository(String),

    /// Multiple repositories claim the same URL; configuration error
    #[error("ambiguous repository match for {url}: candidates {}", candidates.join(", "))]
    AmbiguousRepository { url: String, candidates: Vec<String> },

    /// No pipeline definition matches this event
    #[error("no matching pipeline definition: {0}")]
    NotFound(String),

    /// A nested reference cannot be fetched, or the chain is cyclic
    #[error("failed to resolve reference: {0}")]
    Reference(String),

    /// A reference fetch exceeded its deadline
    #[error("reference resolution timed out: {0}")]
    ReferenceTimeout(String),

    /// A resolved definition is structurally invalid
    #[error("invalid pipeline definition: {0}")]
    Validation(String),

    /// A read against the cluster substrate failed
    #[error("cluster request failed: {0}")]
    Cluster(String),

    /// Run creation kept failing at the cluster boundary
    #[error("failed to create run: {0}")]
    Admission(String),

    /// Status publication failed after retries
    #[error("failed to report status: {0}")]
    Report(String),
}

impl OrchestrationError {
    /// True for match outcomes that are logged and silently dropped
    /// rather than surfaced as a commit status.
    pub fn is_dropped_delivery(&self) -> bool {
        matches!(
            self,
            OrchestrationError::UnregisteredRepository(_)
                | OrchestrationError::AmbiguousRepository { .. }
        )
    }

    /// True for resolution outcomes reached before any run identity
    /// exists; these are logged and dropped, never surfaced outward.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            OrchestrationError::NotFound(_)
                | OrchestrationError::Reference(_)
                | OrchestrationError::ReferenceTimeout(_)
                | OrchestrationError::Validation(_)
        )
    }
}
