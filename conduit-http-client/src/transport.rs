//! Round-trippers and the request-id decorating transport.

use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{REQUEST_ID_HEADER, RequestContext};
use crate::{HttpClientError, Result};

/// Component that physically sends a request and returns the raw response.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    /// Send one request.
    async fn round_trip(
        &self,
        request: reqwest::Request,
        ctx: &RequestContext,
    ) -> Result<reqwest::Response>;
}

#[async_trait]
impl<T: RoundTripper + ?Sized> RoundTripper for Arc<T> {
    async fn round_trip(
        &self,
        request: reqwest::Request,
        ctx: &RequestContext,
    ) -> Result<reqwest::Response> {
        (**self).round_trip(request, ctx).await
    }
}

/// Connection settings for a [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Time allowed to establish a TCP connection.
    pub connect_timeout: Option<Duration>,
    /// TCP keep-alive interval.
    pub keep_alive: Duration,
    /// Maximum idle connections kept per host.
    pub max_idle_per_host: usize,
    /// How long idle connections are kept.
    pub idle_timeout: Duration,
    /// Explicit proxy. `None` uses the environment (`HTTP_PROXY` and friends).
    pub proxy: Option<String>,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl TransportSettings {
    /// Settings for the default transport with the given dial timeout.
    pub fn with_dial_timeout(dial_timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(dial_timeout),
            ..Default::default()
        }
    }

    /// Settings for a transport that forwards everything through `proxy`.
    pub fn with_proxy(proxy: impl Into<String>) -> Self {
        Self {
            connect_timeout: None,
            keep_alive: Duration::from_secs(300),
            max_idle_per_host: 10,
            proxy: Some(proxy.into()),
            ..Default::default()
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            keep_alive: Duration::from_secs(15),
            max_idle_per_host: 100,
            idle_timeout: Duration::from_secs(90),
            proxy: None,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

/// Round-tripper backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from connection settings.
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .tcp_keepalive(settings.keep_alive)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .pool_idle_timeout(settings.idle_timeout)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .gzip(true)
            .brotli(true);

        if let Some(timeout) = settings.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(proxy) = &settings.proxy {
            match reqwest::Proxy::all(proxy.as_str()) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => {
                    tracing::warn!(proxy = %proxy, error = %e, "Ignoring malformed proxy address");
                }
            }
        }
        if settings.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::limited(settings.max_redirects));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }
}

#[async_trait]
impl RoundTripper for ReqwestTransport {
    async fn round_trip(
        &self,
        request: reqwest::Request,
        _ctx: &RequestContext,
    ) -> Result<reqwest::Response> {
        self.inner.execute(request).await.map_err(|e| {
            if e.is_connect() {
                HttpClientError::Connection(error_chain(&e))
            } else {
                HttpClientError::Http(e)
            }
        })
    }
}

/// Render an error with its sources, `outer: inner: ...`.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Transport that propagates the context's request id as `X-Request-ID`
/// before delegating to the wrapped round-tripper.
#[derive(Debug, Clone)]
pub struct Transport<R> {
    inner: R,
}

impl<R: RoundTripper> Transport<R> {
    /// Decorate a round-tripper.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Get the wrapped round-tripper.
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: RoundTripper> RoundTripper for Transport<R> {
    async fn round_trip(
        &self,
        mut request: reqwest::Request,
        ctx: &RequestContext,
    ) -> Result<reqwest::Response> {
        if let Some(id) = ctx.request_id() {
            match HeaderValue::from_str(id) {
                Ok(value) => {
                    request
                        .headers_mut()
                        .append(HeaderName::from_static("x-request-id"), value);
                }
                Err(_) => {
                    tracing::debug!(header = REQUEST_ID_HEADER, "Skipping invalid request id");
                }
            }
        }

        self.inner.round_trip(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Capture {
        seen: Mutex<Option<http::HeaderMap>>,
    }

    #[async_trait]
    impl RoundTripper for Capture {
        async fn round_trip(
            &self,
            request: reqwest::Request,
            _ctx: &RequestContext,
        ) -> Result<reqwest::Response> {
            *self.seen.lock() = Some(request.headers().clone());
            let response = http::Response::builder().status(204).body("").unwrap();
            Ok(reqwest::Response::from(response))
        }
    }

    fn request() -> reqwest::Request {
        reqwest::Request::new(
            http::Method::GET,
            url::Url::parse("http://localhost/").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_request_id_header_added() {
        let capture = Arc::new(Capture { seen: Mutex::new(None) });
        let transport = Transport::new(capture.clone());
        let ctx = RequestContext::new().with_request_id("42");

        let response = transport.round_trip(request(), &ctx).await.unwrap();
        assert_eq!(response.status(), 204);

        let headers = capture.seen.lock().clone().unwrap();
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "42");
    }

    #[tokio::test]
    async fn test_request_id_absent_is_noop() {
        let capture = Arc::new(Capture { seen: Mutex::new(None) });
        let transport = Transport::new(capture.clone());

        transport
            .round_trip(request(), &RequestContext::new())
            .await
            .unwrap();

        let headers = capture.seen.lock().clone().unwrap();
        assert!(headers.get(REQUEST_ID_HEADER).is_none());
    }

    #[test]
    fn test_malformed_proxy_is_ignored() {
        let settings = TransportSettings::with_proxy("::not a proxy");
        assert!(ReqwestTransport::new(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_refused_connection_maps_to_connection_error() {
        let transport = ReqwestTransport::new(&TransportSettings::default()).unwrap();
        let request = reqwest::Request::new(
            http::Method::GET,
            url::Url::parse("http://127.0.0.1:1/").unwrap(),
        );

        let err = transport
            .round_trip(request, &RequestContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::Connection(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_proxy_settings() {
        let settings = TransportSettings::with_proxy("http://proxy.local:3128");
        assert_eq!(settings.proxy.as_deref(), Some("http://proxy.local:3128"));
        assert_eq!(settings.max_idle_per_host, 10);
        assert!(settings.connect_timeout.is_none());
    }
}
