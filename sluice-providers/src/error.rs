//! Error types for provider implementations

use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur when talking to a VCS backend
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Payload failed shape or signature validation
    #[error("invalid payload: {0}")]
    Payload(String),

    /// The delivery is well-formed but not an event kind we run on
    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),

    /// HTTP transport failed
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider API rejected a status publication
    #[error("status report rejected (status {status}): {message}")]
    Report { status: u16, message: String },

    /// A requested file does not exist at the event's revision
    #[error("file not found: {0}")]
    FileNotFound(String),
}
