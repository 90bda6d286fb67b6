//! Error types for proxy resolution and authentication negotiation

use http::StatusCode;
use thiserror::Error;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for proxy-aware requests and negotiation
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid URL
    #[error("Invalid URL")]
    InvalidUrl,

    /// Network error from the underlying HTTP engine
    #[error("Network error: {message}")]
    Network {
        /// Error message
        message: String,
    },

    /// Proxy authentication negotiation is not available on this platform
    #[error("Proxy negotiation is not supported on this platform")]
    NegotiationUnsupported,

    /// The proxy answered the initial token with something other than a challenge
    #[error("Expected proxy authentication challenge, got status {0}")]
    UnexpectedChallengeStatus(StatusCode),

    /// The proxy did not send exactly one challenge for the negotiation scheme
    #[error("Did not get exactly one {scheme} challenge from proxy (got {count})")]
    ChallengeCount {
        /// Negotiation scheme name
        scheme: String,
        /// Number of matching challenge entries received
        count: usize,
    },

    /// Challenge token was not valid base64
    #[error("Malformed challenge token: {0}")]
    MalformedChallenge(#[from] base64::DecodeError),

    /// The platform security context rejected a token exchange step
    #[error("Security context error: {message}")]
    SecurityContext {
        /// Error message
        message: String,
    },

    /// Negotiation did not complete within the configured bound
    #[error("Proxy negotiation timed out")]
    NegotiationTimeout,

    /// UTF-8 conversion error
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
