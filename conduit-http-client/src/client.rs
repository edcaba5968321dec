//! HTTP client implementation.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::callback::CallbackChain;
use crate::config::TransportKind;
use crate::logger::Logger;
use crate::metrics::Metrics;
use crate::oauth::{ClientCredentialsTokenSource, OAuthTransport};
use crate::request::{Request, basic_auth_header, bearer_header};
use crate::retry::RetryConfig;
use crate::transport::{ReqwestTransport, RoundTripper, Transport, TransportSettings};
use crate::{HttpClientConfig, HttpClientConfigBuilder, Response, Result};

/// HTTP client with callback chains, native retries and metrics reporting.
///
/// Cloning is cheap; clones share the transport, the callbacks and every
/// breaker inside them.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: HttpClientConfig,
    transport: Arc<dyn RoundTripper>,
    host_url: Option<Url>,
    default_headers: HeaderMap,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration.
    ///
    /// Fails only when the underlying reqwest client cannot be built.
    /// Malformed host, proxy and token URLs are logged and degrade instead.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let transport = build_transport(&config)?;

        let host_url = config.host_url.as_deref().and_then(|raw| match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(host_url = %raw, error = %e, "Ignoring malformed host URL");
                None
            }
        });

        let default_headers = default_headers(&config);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                host_url,
                default_headers,
            }),
        })
    }

    /// Create a new configuration builder.
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfig::builder()
    }

    /// Start a new request.
    pub fn new_request(&self) -> Request {
        Request::new(self.clone())
    }

    /// Perform a GET request with no per-call options.
    pub async fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.new_request().get(url).await
    }

    /// Get the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.inner.config
    }

    /// Get the parsed host URL.
    pub fn host_url(&self) -> Option<&Url> {
        self.inner.host_url.as_ref()
    }

    /// Get the round-tripper requests are sent through.
    pub fn transport(&self) -> &Arc<dyn RoundTripper> {
        &self.inner.transport
    }

    pub(crate) fn callbacks(&self) -> &CallbackChain {
        &self.inner.config.callbacks
    }

    pub(crate) fn retry(&self) -> &RetryConfig {
        &self.inner.config.retry
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<dyn Metrics>> {
        self.inner.config.metrics.as_ref()
    }

    pub(crate) fn logger(&self) -> &dyn Logger {
        self.inner.config.logger.as_ref()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }

    pub(crate) fn default_headers(&self) -> &HeaderMap {
        &self.inner.default_headers
    }

    pub(crate) fn is_error_for_status(&self) -> bool {
        self.inner.config.error_for_status
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.inner.config.debug
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.inner.config)
            .field("host_url", &self.inner.host_url)
            .finish_non_exhaustive()
    }
}

fn build_transport(config: &HttpClientConfig) -> Result<Arc<dyn RoundTripper>> {
    let settings = TransportSettings {
        proxy: config.proxy.clone(),
        follow_redirects: config.follow_redirects,
        max_redirects: config.max_redirects,
        ..TransportSettings::with_dial_timeout(config.connect_timeout)
    };

    let transport: Arc<dyn RoundTripper> = match &config.transport {
        TransportKind::Default => Arc::new(Transport::new(ReqwestTransport::new(&settings)?)),
        TransportKind::Proxy(proxy) => {
            let settings = TransportSettings {
                follow_redirects: config.follow_redirects,
                max_redirects: config.max_redirects,
                ..TransportSettings::with_proxy(proxy.clone())
            };
            Arc::new(Transport::new(ReqwestTransport::new(&settings)?))
        }
        TransportKind::OAuth(credentials) => {
            let source = Arc::new(ClientCredentialsTokenSource::new(credentials.clone())?);
            let base = Transport::new(ReqwestTransport::new(&settings)?);
            Arc::new(OAuthTransport::new(source, base))
        }
        TransportKind::Custom(transport) => transport.clone(),
    };

    Ok(transport)
}

fn default_headers(config: &HttpClientConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();

    match HeaderValue::from_str(&config.user_agent) {
        Ok(value) => {
            headers.insert(http::header::USER_AGENT, value);
        }
        Err(_) => warn!(user_agent = %config.user_agent, "Ignoring invalid user agent"),
    }

    for (name, value) in &config.default_headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid default header"),
        }
    }

    // Bearer token wins over basic credentials when both are set
    let auth = config
        .auth_token
        .as_deref()
        .and_then(bearer_header)
        .or_else(|| {
            config
                .basic_auth
                .as_ref()
                .and_then(|(user, pass)| basic_auth_header(user, pass))
        });
    if let Some(auth) = auth {
        headers.insert(http::header::AUTHORIZATION, auth);
    }

    if !config.cookies.is_empty() {
        let cookie = config
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.insert(http::header::COOKIE, value);
            }
            Err(_) => warn!("Ignoring invalid cookies"),
        }
    }

    headers
}
