//! Notification error types.

use thiserror::Error;

/// Errors that can occur when delivering a flag to an external sink.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The endpoint rejected our credentials.
    #[error("webhook authentication failed: {0}")]
    Unauthorized(String),

    /// The endpoint answered with an error status.
    #[error("webhook rejected flag (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request timed out.
    #[error("webhook timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}
