//! Per-call request builder and execution pipeline.

use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::time::{Duration, Instant};
use url::Url;

use crate::callback::Terminal;
use crate::context::RequestContext;
use crate::metrics::{Report, metrics_alias};
use crate::transport::RoundTripper;
use crate::{HttpClient, HttpClientError, RequestInfo, Response, Result};

/// HTTP request builder.
///
/// Obtained from [`HttpClient::new_request`]; the verb methods consume it, so
/// a request is executed at most once.
pub struct Request {
    client: HttpClient,
    alias: Option<String>,
    headers: HeaderMap,
    auth: Option<HeaderValue>,
    query: Vec<(String, String)>,
    path_params: Vec<(String, String)>,
    body: Option<Bytes>,
    build_error: Option<String>,
    timeout: Option<Duration>,
    context: RequestContext,
}

impl Request {
    pub(crate) fn new(client: HttpClient) -> Self {
        Self {
            client,
            alias: None,
            headers: HeaderMap::new(),
            auth: None,
            query: Vec::new(),
            path_params: Vec::new(),
            body: None,
            build_error: None,
            timeout: None,
            context: RequestContext::default(),
        }
    }

    /// The host URL configured on the client.
    pub fn host_url(&self) -> Option<&Url> {
        self.client.host_url()
    }

    /// Set the metrics alias, replacing the derived one.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the call context (request id, deadline).
    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Add a header to the request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            self.headers.insert(name, value);
        } else {
            tracing::warn!(header = %name, "Ignoring invalid request header");
        }
        self
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set basic authentication for this request.
    pub fn basic_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = basic_auth_header(username, password);
        self
    }

    /// Set bearer authentication for this request.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth = bearer_header(token);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn query_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query.push((k.into(), v.into()));
        }
        self
    }

    /// Substitute `{key}` placeholders in the URL path. Values are percent-encoded.
    pub fn path_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.path_params.push((k.into(), v.into()));
        }
        self
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body = Some(Bytes::from(text.into()));
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.body = Some(Bytes::from(bytes));
            }
            Err(e) => {
                self.build_error = Some(format!("JSON body: {}", e));
            }
        }
        self
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                self.body = Some(Bytes::from(encoded));
            }
            Err(e) => {
                self.build_error = Some(format!("form body: {}", e));
            }
        }
        self
    }

    /// Set a custom timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Perform a GET request.
    pub async fn get(self, url: impl Into<String>) -> Result<Response> {
        self.execute(Method::GET, url).await
    }

    /// Perform a POST request.
    pub async fn post(self, url: impl Into<String>) -> Result<Response> {
        self.execute(Method::POST, url).await
    }

    /// Perform a PUT request.
    pub async fn put(self, url: impl Into<String>) -> Result<Response> {
        self.execute(Method::PUT, url).await
    }

    /// Perform a PATCH request.
    pub async fn patch(self, url: impl Into<String>) -> Result<Response> {
        self.execute(Method::PATCH, url).await
    }

    /// Perform a DELETE request.
    pub async fn delete(self, url: impl Into<String>) -> Result<Response> {
        self.execute(Method::DELETE, url).await
    }

    /// Perform the request with the given method and URL.
    ///
    /// The call runs through the client's callback chain. Once it completes,
    /// metrics are reported in the background under the call's alias.
    pub async fn execute(self, method: Method, url: impl Into<String>) -> Result<Response> {
        let url = url.into();
        let alias = metrics_alias(
            method.as_str(),
            &url,
            self.client.host_url(),
            self.alias.as_deref(),
        );
        let info = RequestInfo::new(method, url, alias.clone());
        let dispatch = Dispatch {
            request: &self,
            info: &info,
        };

        let chain = self.client.callbacks().run(&info, &dispatch);
        let result = match self.context.deadline() {
            Some(deadline) => {
                let budget = self.context.budget().unwrap_or_default();
                match tokio::time::timeout_at(deadline, chain).await {
                    // The transport timeout is bounded by the deadline and may fire first
                    Ok(Err(e)) if e.is_timeout() && tokio::time::Instant::now() >= deadline => {
                        Err(HttpClientError::Timeout(budget))
                    }
                    Ok(result) => result,
                    Err(_) => Err(HttpClientError::Timeout(budget)),
                }
            }
            None => chain.await,
        };

        if let Some(metrics) = self.client.metrics() {
            Report::new(alias, &result).spawn(metrics.clone());
        }

        result
    }

    /// Terminal action: send with native retries.
    ///
    /// Response time covers every attempt and the waits between them.
    async fn dispatch(&self, info: &RequestInfo) -> Result<Response> {
        let retry = self.client.retry();
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            let result = self.send_once(info, started).await;
            if !retry.should_retry(attempt, &result) {
                return result;
            }

            let delay = retry.delay_for_attempt(attempt);
            self.client.logger().warn(&format!(
                "{} {}: attempt {} failed ({}), retrying in {:?}",
                info.method(),
                info.url(),
                attempt + 1,
                describe(&result),
                delay
            ));
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(&self, info: &RequestInfo, started: Instant) -> Result<Response> {
        let request = self.build(info)?;
        let debug = self.client.is_debug();
        if debug {
            self.client
                .logger()
                .debug(&format!("--> {} {}", request.method(), request.url()));
        }

        let raw = self
            .client
            .transport()
            .round_trip(request, &self.context)
            .await?;
        let response = Response::from_reqwest(raw, info.clone(), started).await?;

        if debug {
            self.client.logger().debug(&format!(
                "<-- {} {} ({} bytes, {:?})",
                response.status(),
                response.url(),
                response.body().len(),
                response.response_time()
            ));
        }

        let status = response.status();
        let unfollowed_redirect = status.is_redirection() && status != StatusCode::NOT_MODIFIED;
        let rejected = self.client.is_error_for_status()
            && (status.is_client_error() || status.is_server_error());
        if unfollowed_redirect || rejected {
            return Err(HttpClientError::Status(Box::new(response)));
        }

        Ok(response)
    }

    /// Build the reqwest request for one attempt.
    fn build(&self, info: &RequestInfo) -> Result<reqwest::Request> {
        if let Some(e) = &self.build_error {
            return Err(HttpClientError::RequestBuild(e.clone()));
        }

        let url = self.resolve_url(info.url())?;
        let mut request = reqwest::Request::new(info.method().clone(), url);

        let mut headers = self.client.default_headers().clone();
        headers.extend(self.headers.clone());
        if let Some(auth) = &self.auth {
            headers.insert(http::header::AUTHORIZATION, auth.clone());
        }
        *request.headers_mut() = headers;

        if let Some(body) = &self.body {
            *request.body_mut() = Some(reqwest::Body::from(body.clone()));
        }

        let mut timeout = self.timeout.unwrap_or(self.client.timeout());
        if let Some(remaining) = self.context.remaining() {
            if remaining.is_zero() {
                return Err(HttpClientError::Timeout(self.context.budget().unwrap_or(timeout)));
            }
            timeout = timeout.min(remaining);
        }
        *request.timeout_mut() = Some(timeout);

        Ok(request)
    }

    /// Resolve the call URL against the host URL, then apply path and query params.
    fn resolve_url(&self, url: &str) -> Result<Url> {
        let mut raw = match self.client.host_url() {
            Some(host) if !url.contains("://") => format!(
                "{}/{}",
                host.as_str().trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            _ => url.to_string(),
        };

        for (key, value) in &self.path_params {
            raw = raw.replace(&format!("{{{}}}", key), &urlencoding::encode(value));
        }

        let mut parsed = Url::parse(&raw)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HttpClientError::InvalidUrl(format!(
                "unsupported scheme {:?} in {}",
                parsed.scheme(),
                raw
            )));
        }

        if !self.query.is_empty() {
            let mut query_pairs = parsed.query_pairs_mut();
            for (key, value) in &self.query {
                query_pairs.append_pair(key, value);
            }
        }

        Ok(parsed)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("alias", &self.alias)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("path_params", &self.path_params)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("build_error", &self.build_error)
            .field("timeout", &self.timeout)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

struct Dispatch<'a> {
    request: &'a Request,
    info: &'a RequestInfo,
}

impl Terminal for Dispatch<'_> {
    fn dispatch(&self) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.request.dispatch(self.info))
    }
}

fn describe(result: &Result<Response>) -> String {
    match result {
        Ok(response) => format!("status {}", response.status_code()),
        Err(e) => e.to_string(),
    }
}

/// `Authorization: Basic ...` header value.
pub(crate) fn basic_auth_header(username: &str, password: &str) -> Option<HeaderValue> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    HeaderValue::from_str(&format!("Basic {}", encoded)).ok()
}

/// `Authorization: Bearer ...` header value.
pub(crate) fn bearer_header(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {}", token)).ok()
}
