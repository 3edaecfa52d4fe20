//! Realtime error types.

use crate::envelope::EnvelopeError;
use thiserror::Error;

/// Realtime error type.
///
/// Channel failures never surface here; they are absorbed by the connection
/// state machine. Only user-initiated one-shot requests and construction
/// return errors.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success HTTP status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the body, or the raw body.
        message: String,
    },

    /// The API answered `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// No session token is available.
    #[error("No session token; connect first")]
    NoToken,

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed event
    #[error("Invalid event: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Result type alias using RealtimeError.
pub type RealtimeResult<T> = Result<T, RealtimeError>;
