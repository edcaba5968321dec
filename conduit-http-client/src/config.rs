//! HTTP client configuration.
//!
//! Every builder method configures one aspect of the client. They can be
//! applied in any order, except the ones registering chain callbacks
//! ([`circuit_breaker`](HttpClientConfigBuilder::circuit_breaker), the
//! backoff methods and [`chain_callback`](HttpClientConfigBuilder::chain_callback)):
//! a callback registered later wraps the ones registered before it.

use std::sync::Arc;
use std::time::Duration;

use crate::callback::{Callback, CallbackChain};
use crate::circuit_breaker::{CircuitBreakerCallback, CircuitBreakerConfig};
use crate::logger::{Logger, TracingLogger};
use crate::metrics::Metrics;
use crate::oauth::ClientCredentialsConfig;
use crate::retry::{BackoffConfig, RetryCallback, RetryConditionFn, RetryConfig};
use crate::transport::RoundTripper;

/// Which round-tripper the client sends requests through.
#[derive(Clone, Default)]
pub enum TransportKind {
    /// Pooled reqwest transport with request-id propagation.
    #[default]
    Default,
    /// Reqwest transport forwarding every request through a proxy, with
    /// request-id propagation.
    Proxy(String),
    /// Default transport authorized with client-credentials tokens.
    OAuth(ClientCredentialsConfig),
    /// Caller-supplied round-tripper, used as is.
    Custom(Arc<dyn RoundTripper>),
}

impl std::fmt::Debug for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Proxy(url) => f.debug_tuple("Proxy").field(url).finish(),
            Self::OAuth(config) => f
                .debug_struct("OAuth")
                .field("client_id", &config.client_id)
                .field("token_url", &config.token_url)
                .finish_non_exhaustive(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// HTTP client configuration.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Host URL prefixed to relative request URLs.
    pub host_url: Option<String>,
    /// Default request timeout.
    pub timeout: Duration,
    /// Connection (dial) timeout for built-in transports.
    pub connect_timeout: Duration,
    /// Transport selection.
    pub transport: TransportKind,
    /// Proxy applied to the built-in default and OAuth transports.
    pub proxy: Option<String>,
    /// User agent string.
    pub user_agent: String,
    /// Default basic auth credentials.
    pub basic_auth: Option<(String, String)>,
    /// Default bearer token.
    pub auth_token: Option<String>,
    /// Cookies sent with every request.
    pub cookies: Vec<(String, String)>,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
    /// Return 4xx and 5xx responses as [`HttpClientError::Status`](crate::HttpClientError::Status).
    pub error_for_status: bool,
    /// Native retry settings.
    pub retry: RetryConfig,
    /// Callbacks wrapped around every call.
    pub callbacks: CallbackChain,
    /// Metrics sink.
    pub metrics: Option<Arc<dyn Metrics>>,
    /// Diagnostic logger.
    pub logger: Arc<dyn Logger>,
    /// Log a line per request and response through the logger.
    pub debug: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            host_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            transport: TransportKind::Default,
            proxy: None,
            user_agent: format!("conduit-http-client/{}", env!("CARGO_PKG_VERSION")),
            basic_auth: None,
            auth_token: None,
            cookies: Vec::new(),
            default_headers: Vec::new(),
            follow_redirects: true,
            max_redirects: 10,
            error_for_status: false,
            retry: RetryConfig::default(),
            callbacks: CallbackChain::new(),
            metrics: None,
            logger: Arc::new(TracingLogger),
            debug: false,
        }
    }
}

impl std::fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("host_url", &self.host_url)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("transport", &self.transport)
            .field("proxy", &self.proxy)
            .field("user_agent", &self.user_agent)
            .field("follow_redirects", &self.follow_redirects)
            .field("max_redirects", &self.max_redirects)
            .field("error_for_status", &self.error_for_status)
            .field("retry", &self.retry)
            .field("callbacks", &self.callbacks)
            .field("metrics", &self.metrics.is_some())
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl HttpClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client configuration.
#[derive(Debug, Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Use the pooled default transport with the given dial timeout.
    pub fn default_transport(mut self, dial_timeout: Duration) -> Self {
        self.config.connect_timeout = dial_timeout;
        self.config.transport = TransportKind::Default;
        self
    }

    /// Use a custom round-tripper.
    pub fn transport(mut self, transport: Arc<dyn RoundTripper>) -> Self {
        self.config.transport = TransportKind::Custom(transport);
        self
    }

    /// Authorize every request with a client-credentials token, on top of the
    /// default transport with the given dial timeout.
    pub fn oauth_transport(mut self, credentials: ClientCredentialsConfig, dial_timeout: Duration) -> Self {
        self.config.connect_timeout = dial_timeout;
        self.config.transport = TransportKind::OAuth(credentials);
        self
    }

    /// Use a transport forwarding every request through `proxy_url`.
    pub fn default_transport_with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.transport = TransportKind::Proxy(proxy_url.into());
        self
    }

    /// Set a proxy for the built-in transports.
    pub fn proxy(mut self, address: impl Into<String>) -> Self {
        self.config.proxy = Some(address.into());
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Send basic auth credentials with every request.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.basic_auth = Some((username.into(), password.into()));
        self
    }

    /// Send a bearer token with every request.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    /// Send a cookie with every request.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.cookies.push((name.into(), value.into()));
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the host URL for relative request URLs.
    pub fn host_url(mut self, url: impl Into<String>) -> Self {
        self.config.host_url = Some(url.into());
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Return 4xx and 5xx responses as errors.
    pub fn error_for_status(mut self, enable: bool) -> Self {
        self.config.error_for_status = enable;
        self
    }

    /// Guard calls with a circuit breaker.
    pub fn circuit_breaker(self, config: CircuitBreakerConfig) -> Self {
        self.chain_callback(Arc::new(CircuitBreakerCallback::new(config)))
    }

    /// Retry with linearly growing delays.
    pub fn linear_backoff(self, retries: u32, wait: Duration) -> Self {
        self.backoff(retries, wait, false)
    }

    /// Retry with exponentially growing delays.
    pub fn exponential_backoff(self, retries: u32, wait: Duration) -> Self {
        self.backoff(retries, wait, true)
    }

    /// Retry with linear or exponential backoff.
    ///
    /// Registers a retry callback and also sets the native retry count.
    pub fn backoff(mut self, retries: u32, wait: Duration, exponential: bool) -> Self {
        self.config.retry.retry_count = retries;
        self.chain_callback(Arc::new(RetryCallback::new(BackoffConfig::new(
            retries,
            wait,
            exponential,
        ))))
    }

    /// Set the native retry parameters.
    pub fn retries(mut self, retries: u32, wait: Duration, max_wait: Duration) -> Self {
        self.config.retry.retry_count = retries;
        self.config.retry.wait_time = wait;
        self.config.retry.max_wait_time = max_wait;
        self
    }

    /// Add a native retry predicate.
    pub fn retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&crate::Result<crate::Response>) -> bool + Send + Sync + 'static,
    {
        self.config.retry.conditions.push(Arc::new(condition));
        self
    }

    /// Add several native retry predicates.
    pub fn retry_conditions<I>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = RetryConditionFn>,
    {
        self.config.retry.conditions.extend(conditions);
        self
    }

    /// Report call metrics to `metrics`.
    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.config.metrics = Some(metrics);
        self
    }

    /// Send diagnostic lines to `logger`.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.config.logger = logger;
        self
    }

    /// Log a line per request and response.
    pub fn debug(mut self, enable: bool) -> Self {
        self.config.debug = enable;
        self
    }

    /// Wrap every call with `callback`, outside the callbacks registered so far.
    pub fn chain_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.config.callbacks.push(callback);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}
