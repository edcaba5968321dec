//! HTTP response wrapper.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant, SystemTime};

use crate::{HttpClientError, Result};

/// Snapshot of the request that produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    method: Method,
    url: String,
    alias: String,
}

impl RequestInfo {
    pub(crate) fn new(method: Method, url: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            alias: alias.into(),
        }
    }

    /// HTTP method of the call.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL as passed to the verb, before host URL resolution.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Metrics alias computed for the call.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// A cookie set by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Path attribute.
    pub path: Option<String>,
    /// Domain attribute.
    pub domain: Option<String>,
    /// Max-Age attribute.
    pub max_age: Option<Duration>,
    /// Expires attribute.
    pub expires: Option<SystemTime>,
    /// Secure flag.
    pub secure: bool,
    /// HttpOnly flag.
    pub http_only: bool,
}

impl Cookie {
    fn from_reqwest(cookie: reqwest::cookie::Cookie<'_>) -> Self {
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            path: cookie.path().map(str::to_string),
            domain: cookie.domain().map(str::to_string),
            max_age: cookie.max_age(),
            expires: cookie.expires(),
            secure: cookie.secure(),
            http_only: cookie.http_only(),
        }
    }
}

/// HTTP response wrapper.
///
/// Immutable once built, so it can be shared or cloned freely.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    cookies: Vec<Cookie>,
    url: url::Url,
    request: RequestInfo,
    response_time: Duration,
}

impl Response {
    /// Create a response from a reqwest response.
    ///
    /// The response time is measured from `started` to the moment the body
    /// has been read.
    pub(crate) async fn from_reqwest(
        response: reqwest::Response,
        request: RequestInfo,
        started: Instant,
    ) -> Result<Self> {
        let mut snapshot = Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: Bytes::new(),
            cookies: response.cookies().map(Cookie::from_reqwest).collect(),
            url: response.url().clone(),
            request,
            response_time: Duration::ZERO,
        };

        let body = response.bytes().await;
        snapshot.response_time = started.elapsed();
        match body {
            Ok(body) => {
                snapshot.body = body;
                Ok(snapshot)
            }
            Err(source) => Err(HttpClientError::Body {
                response: Box::new(snapshot),
                source,
            }),
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the status code as a number.
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response was a redirect (3xx).
    pub fn is_redirection(&self) -> bool {
        self.status.is_redirection()
    }

    /// Check if the response was a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response was a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value. Lookup is case-insensitive.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get all cookies set by the response.
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Find a cookie by name.
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Get the final response URL.
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Get the request that produced this response.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Time spent between dispatch and the full body being read.
    pub fn response_time(&self) -> Duration {
        self.response_time
    }

    /// Get the response body as bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body as bytes.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| HttpClientError::Decode(e.to_string()))
    }

    /// Parse the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HttpClientError::Json(e.to_string()))
    }

    /// Get the content length if available.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Get the content type if available.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Turn a 4xx or 5xx response into an error.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            Err(HttpClientError::Status(Box::new(self)))
        } else {
            Ok(self)
        }
    }
}
