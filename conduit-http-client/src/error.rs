//! HTTP Client error types.

use std::time::Duration;
use thiserror::Error;

use crate::Response;

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, HttpClientError>;

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// Circuit breaker is open, rejecting requests.
    ///
    /// Callbacks must pass this variant through untouched so callers and the
    /// metrics reporter can recognise it.
    #[error("Circuit breaker is open, request rejected")]
    CircuitOpen,

    /// Request timed out.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request building error.
    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    /// A response was received but the status policy rejected it.
    #[error("Unexpected response status: {}", .0.status())]
    Status(Box<Response>),

    /// Status and headers were received but reading the body failed. The
    /// response carries an empty body.
    #[error("Failed to read response body ({}): {source}", .response.status())]
    Body {
        /// Response received before the failure.
        response: Box<Response>,
        /// Underlying read error.
        #[source]
        source: reqwest::Error,
    },

    /// Response body could not be decoded.
    #[error("Failed to decode response body: {0}")]
    Decode(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// OAuth token exchange error.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl HttpClientError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Connection(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status(response) => {
                let status = response.status_code();
                // Unfollowed redirects, 5xx, request timeout and rate limit
                (300..400).contains(&status) || status >= 500 || status == 408 || status == 429
            }
            Self::Body { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_)) || matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_)) || matches!(self, Self::Http(e) if e.is_connect())
    }

    /// Check if this is the circuit-open rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// Get the response carried by this error, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Status(response) | Self::Body { response, .. } => Some(&**response),
            _ => None,
        }
    }

    /// Get the HTTP status code if this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status(response) | Self::Body { response, .. } => Some(response.status_code()),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
