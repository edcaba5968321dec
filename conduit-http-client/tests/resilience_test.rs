//! Callback chain, circuit breaker, backoff and metrics scenarios.

use async_trait::async_trait;
use conduit_http_client::{
    BackoffConfig, Callback, CircuitBreakerConfig, HttpClient, HttpClientError, Level, Logger,
    LoggingCallback, Metrics, Next, Response, Result, RetryCallback,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records the status code of every successful call.
#[derive(Default)]
struct StatusRecorder {
    buffer: Mutex<String>,
}

#[async_trait]
impl Callback for StatusRecorder {
    async fn call(&self, next: Next<'_>) -> Result<Response> {
        let result = next.run().await;
        if let Ok(response) = &result {
            self.buffer.lock().push_str(&response.status_code().to_string());
        }
        result
    }
}

/// Counts how often the rest of the chain reaches it.
#[derive(Default)]
struct CallCounter {
    calls: AtomicU32,
}

#[async_trait]
impl Callback for CallCounter {
    async fn call(&self, next: Next<'_>) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next.run().await
    }
}

#[derive(Default)]
struct RecordingMetrics {
    counters: Mutex<Vec<String>>,
    series: Mutex<Vec<(String, f64)>>,
    totals: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl Metrics for RecordingMetrics {
    fn incr_counter(&self, name: &str) {
        self.counters.lock().push(name.to_string());
    }

    fn push_to_series(&self, name: &str, value: f64) {
        self.series.lock().push((name.to_string(), value));
    }

    fn incr_counter_with_attrs(&self, name: &str, attributes: &HashMap<String, String>) {
        self.totals.lock().push((name.to_string(), attributes.clone()));
    }
}

#[derive(Default)]
struct LineLogger {
    lines: Mutex<Vec<String>>,
}

impl Logger for LineLogger {
    fn log(&self, level: Level, message: &str) {
        self.lines.lock().push(format!("{}: {}", level, message));
    }
}

async fn flaky_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(302))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_circuit_breaker_scenario() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let breaker = CircuitBreakerConfig::new(1, 1).with_wait_duration(Duration::from_millis(200));
    let config = HttpClient::builder().circuit_breaker(breaker).build();
    let client = assert_ok!(HttpClient::new(config));

    // Nothing listens on port 1
    let err = assert_err!(client.new_request().get("http://127.0.0.1:1/").await);
    assert!(matches!(err, HttpClientError::Connection(_)));
    assert!(err.response().is_none());

    for _ in 0..2 {
        let err = assert_err!(client.new_request().get("http://127.0.0.1:1/").await);
        assert!(err.is_circuit_open());
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    let healthy = format!("{}/healthy", server.uri());
    let response = assert_ok!(client.new_request().get(healthy).await);
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_linear_backoff_scenario() {
    let server = flaky_server().await;
    let config = HttpClient::builder()
        .host_url(server.uri())
        .follow_redirects(false)
        .linear_backoff(3, Duration::from_millis(10))
        .build();
    let client = assert_ok!(HttpClient::new(config));

    let response = assert_ok!(client.new_request().get("/flaky").await);
    assert_eq!(response.status_code(), 200);
    assert_eq!(assert_ok!(response.text()), "recovered");

    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn test_exponential_backoff_scenario() {
    let server = flaky_server().await;
    let config = HttpClient::builder()
        .host_url(server.uri())
        .follow_redirects(false)
        .exponential_backoff(3, Duration::from_millis(10))
        .build();
    let client = assert_ok!(HttpClient::new(config));

    let response = assert_ok!(client.new_request().get("/flaky").await);
    assert_eq!(response.status_code(), 200);

    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn test_retry_callback_until_success() {
    for backoff in [
        BackoffConfig::linear(3, Duration::from_millis(10)),
        BackoffConfig::exponential(3, Duration::from_millis(10)),
    ] {
        let server = flaky_server().await;
        let counter = Arc::new(CallCounter::default());
        let config = HttpClient::builder()
            .host_url(server.uri())
            .follow_redirects(false)
            .chain_callback(counter.clone())
            .chain_callback(Arc::new(RetryCallback::new(backoff)))
            .build();
        assert_eq!(config.retry.retry_count, 0);
        let client = assert_ok!(HttpClient::new(config));

        let response = assert_ok!(client.new_request().get("/flaky").await);
        assert_eq!(response.status_code(), 200);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);

        let received = server.received_requests().await.expect("recording enabled");
        assert_eq!(received.len(), 3);
    }
}

#[tokio::test]
async fn test_retry_callback_returns_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("still down"))
        .mount(&server)
        .await;

    let counter = Arc::new(CallCounter::default());
    let config = HttpClient::builder()
        .host_url(server.uri())
        .error_for_status(true)
        .chain_callback(counter.clone())
        .chain_callback(Arc::new(RetryCallback::new(BackoffConfig::linear(
            2,
            Duration::from_millis(5),
        ))))
        .build();
    let client = assert_ok!(HttpClient::new(config));

    let err = assert_err!(client.new_request().get("/down").await);
    assert_eq!(err.status_code(), Some(503));
    assert_eq!(err.response().map(|r| r.body().as_ref()), Some(&b"still down"[..]));
    assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_callback_does_not_retry_open_circuit() {
    let counter = Arc::new(CallCounter::default());
    let config = HttpClient::builder()
        .chain_callback(counter.clone())
        .circuit_breaker(CircuitBreakerConfig::new(1, 1).with_wait_duration(Duration::from_secs(60)))
        .chain_callback(Arc::new(RetryCallback::new(BackoffConfig::linear(
            3,
            Duration::from_millis(5),
        ))))
        .build();
    let client = assert_ok!(HttpClient::new(config));

    // The first attempt fails and opens the breaker; the retry is rejected
    let err = assert_err!(client.new_request().get("http://127.0.0.1:1/").await);
    assert!(err.is_circuit_open());
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_response_time_spans_native_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accepted"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accepted"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let wait = Duration::from_millis(200);
    let config = HttpClient::builder()
        .host_url(server.uri())
        .retries(1, wait, wait)
        .retry_condition(|result| matches!(result, Ok(r) if r.status_code() == 202))
        .build();
    let client = assert_ok!(HttpClient::new(config));

    let response = assert_ok!(client.new_request().get("/accepted").await);
    assert_eq!(response.status_code(), 200);
    assert!(
        response.response_time() >= wait,
        "response time {:?} shorter than the retry wait",
        response.response_time()
    );
}

#[tokio::test]
async fn test_retries_exhausted_return_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let logger = Arc::new(LineLogger::default());
    let config = HttpClient::builder()
        .host_url(server.uri())
        .error_for_status(true)
        .retries(2, Duration::from_millis(5), Duration::from_millis(20))
        .logger(logger.clone())
        .build();
    let client = assert_ok!(HttpClient::new(config));

    let err = assert_err!(client.new_request().get("/down").await);
    assert_eq!(err.status_code(), Some(503));

    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 3);

    let lines = logger.lines.lock();
    assert_eq!(lines.iter().filter(|line| line.starts_with("WARN: ")).count(), 2);
}

#[tokio::test]
async fn test_retry_condition_on_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = HttpClient::builder()
        .host_url(server.uri())
        .retries(1, Duration::from_millis(5), Duration::from_millis(5))
        .retry_condition(|result| matches!(result, Ok(r) if r.status_code() == 202))
        .build();
    let client = assert_ok!(HttpClient::new(config));

    let response = assert_ok!(client.new_request().get("/busy").await);
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_callback_records_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body"))
        .mount(&server)
        .await;

    let recorder = Arc::new(StatusRecorder::default());
    let config = HttpClient::builder()
        .host_url(server.uri())
        .chain_callback(recorder.clone())
        .chain_callback(Arc::new(LoggingCallback::new().with_headers()))
        .build();
    let client = assert_ok!(HttpClient::new(config));

    let response = assert_ok!(client.new_request().get("/ok").await);
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.body().as_ref(), b"body");
    assert_eq!(*recorder.buffer.lock(), "200");
}

#[tokio::test]
async fn test_metrics_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/path"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let metrics = Arc::new(RecordingMetrics::default());
    let config = HttpClient::builder()
        .host_url(server.uri())
        .metrics(metrics.clone())
        .build();
    let client = assert_ok!(HttpClient::new(config));

    assert_ok!(client.new_request().get("/path").await);
    assert_ok!(client.new_request().alias("users.list").get("/path").await);

    // Reporting runs on a spawned task
    tokio::time::sleep(Duration::from_millis(50)).await;

    let base = "GET-127-0-0-1/path";
    let counters = metrics.counters.lock();
    assert!(counters.contains(&format!("{}.status.200", base)));
    assert!(counters.contains(&"users-list.status.200".to_string()));

    let series = metrics.series.lock();
    assert!(series.iter().any(|(name, value)| name == &format!("{}.response_time", base) && *value >= 0.0));

    let totals = metrics.totals.lock();
    assert_eq!(totals.len(), 2);
    assert_eq!(totals[0].0, format!("{}.total", base));
    assert_eq!(totals[0].1.get("status").map(String::as_str), Some("200"));
}

#[tokio::test]
async fn test_metrics_circuit_open() {
    let metrics = Arc::new(RecordingMetrics::default());
    let config = HttpClient::builder()
        .circuit_breaker(CircuitBreakerConfig::new(1, 1).with_wait_duration(Duration::from_secs(60)))
        .metrics(metrics.clone())
        .build();
    let client = assert_ok!(HttpClient::new(config));

    assert_err!(client.new_request().alias("svc").get("").await);
    let err = assert_err!(client.new_request().alias("svc").get("").await);
    assert!(matches!(err, HttpClientError::CircuitOpen));

    tokio::time::sleep(Duration::from_millis(50)).await;

    let counters = metrics.counters.lock();
    assert_eq!(*counters, vec!["svc.errors", "svc.circuit_open"]);
    assert!(metrics.series.lock().is_empty());
}

#[tokio::test]
async fn test_debug_logging() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/debug"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let logger = Arc::new(LineLogger::default());
    let config = HttpClient::builder()
        .host_url(server.uri())
        .logger(logger.clone())
        .debug(true)
        .build();
    let client = assert_ok!(HttpClient::new(config));
    assert_ok!(client.new_request().get("/debug").await);

    let lines = logger.lines.lock();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("DEBUG: --> GET "));
    assert!(lines[1].starts_with("DEBUG: <-- 200 OK "));
}
