//! # Conduit HTTP Client
//!
//! A configurable HTTP client for service-to-service calls. Each call runs
//! through a chain of callbacks before reaching the network, and its outcome
//! is reported to a metrics sink.
//!
//! ## Features
//!
//! - **Callback chain**: Wrap every call with circuit breaking, retries,
//!   logging or your own [`Callback`]
//! - **Circuit Breaker**: Error-percentage breaker over a sliding window
//! - **Backoff**: Linear or exponential retries, plus native retries of the
//!   network dispatch
//! - **Transports**: Pooled default transport, proxy transport, OAuth2
//!   client-credentials transport, or any [`RoundTripper`]
//! - **Request IDs**: `X-Request-ID` propagated from the [`RequestContext`]
//! - **Metrics**: Response time, status, error and circuit counters per call
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit_http_client::{HttpClient, HttpClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::new(HttpClientConfig::default())?;
//!
//!     let response = client
//!         .new_request()
//!         .get("https://api.example.com/users")
//!         .await?;
//!
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## With Circuit Breaker and Backoff
//!
//! ```rust,no_run
//! use conduit_http_client::{CircuitBreakerConfig, HttpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HttpClient::builder()
//!         .host_url("https://api.example.com")
//!         .timeout(Duration::from_secs(30))
//!         .circuit_breaker(CircuitBreakerConfig::default())
//!         .exponential_backoff(3, Duration::from_millis(100))
//!         .build();
//!
//!     let client = HttpClient::new(config)?;
//!
//!     // Retries wrap the breaker: each attempt is counted by it
//!     let response = client
//!         .new_request()
//!         .alias("orders.create")
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))
//!         .post("/orders")
//!         .await?;
//!
//!     println!("Created: {}", response.status());
//!     Ok(())
//! }
//! ```

mod callback;
mod circuit_breaker;
mod client;
mod config;
mod context;
mod error;
mod logger;
mod metrics;
mod oauth;
mod request;
mod response;
mod retry;
mod transport;

pub use callback::{Callback, CallbackChain, LoggingCallback, Next};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerCallback, CircuitBreakerConfig, CircuitState};
pub use client::HttpClient;
pub use config::{HttpClientConfig, HttpClientConfigBuilder, TransportKind};
pub use context::{REQUEST_ID_HEADER, RequestContext};
pub use error::{HttpClientError, Result};
pub use logger::{Level, Logger, TracingLogger, WriterLogger};
pub use metrics::{Metrics, metrics_alias};
pub use oauth::{
    AccessToken, ClientCredentialsConfig, ClientCredentialsTokenSource, OAuthTransport,
    StaticTokenSource, TokenSource,
};
pub use request::Request;
pub use response::{Cookie, RequestInfo, Response};
pub use retry::{BackoffConfig, BackoffStrategy, RetryCallback, RetryConditionFn, RetryConfig};
pub use transport::{ReqwestTransport, RoundTripper, Transport, TransportSettings};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use conduit_http_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::callback::{Callback, Next};
    pub use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    pub use crate::client::HttpClient;
    pub use crate::config::{HttpClientConfig, HttpClientConfigBuilder};
    pub use crate::context::RequestContext;
    pub use crate::error::{HttpClientError, Result};
    pub use crate::metrics::Metrics;
    pub use crate::request::Request;
    pub use crate::response::Response;
    pub use http::{HeaderMap, Method, StatusCode};
}
