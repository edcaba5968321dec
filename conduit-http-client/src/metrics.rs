//! Metrics sink and per-call reporting.
//!
//! Every completed call reports under its metrics alias:
//!
//! | name                     | kind    | when                          |
//! |--------------------------|---------|-------------------------------|
//! | `<alias>.response_time`  | series  | a response was received       |
//! | `<alias>.status.<code>`  | counter | a response was received       |
//! | `<alias>.circuit_open`   | counter | the circuit rejected the call |
//! | `<alias>.errors`         | counter | any other error               |
//! | `<alias>.total`          | counter | always, with a `status` attr  |

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::{HttpClientError, Response};

/// External metrics collaborator.
pub trait Metrics: Send + Sync {
    /// Increment the counter identified by `name`.
    fn incr_counter(&self, name: &str);

    /// Add a sample to the histogram identified by `name`.
    fn push_to_series(&self, name: &str, value: f64);

    /// Increment the counter identified by `name`, attaching attributes.
    fn incr_counter_with_attrs(&self, name: &str, attributes: &HashMap<String, String>);
}

/// Derive the metrics alias for a call.
///
/// An explicit alias wins; otherwise `<method>.<hostname>/<url>` when a host
/// URL is configured; otherwise the raw URL. Dots are replaced with dashes so
/// hostnames do not split the metric hierarchy.
pub fn metrics_alias(method: &str, url: &str, host_url: Option<&Url>, alias: Option<&str>) -> String {
    let alias = match (alias, host_url) {
        (Some(alias), _) if !alias.is_empty() => alias.to_string(),
        (_, Some(host)) => {
            let hostname = host.host_str().unwrap_or_default();
            let path = clean_path(url);
            if path.is_empty() {
                format!("{}.{}", method, hostname)
            } else {
                format!("{}.{}/{}", method, hostname, path)
            }
        }
        _ => url.to_string(),
    };

    alias.replace('.', "-")
}

/// Normalize `url` as a relative path: empty and `.` segments are dropped
/// and `..` removes the previous segment.
fn clean_path(url: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in url.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.join("/")
}

/// Owned outcome of a call, handed to the reporting task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Report {
    alias: String,
    status: Option<u16>,
    response_time: Option<Duration>,
    error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    CircuitOpen,
    Other,
}

impl Report {
    pub(crate) fn new(alias: String, result: &Result<Response, HttpClientError>) -> Self {
        let (response, error) = match result {
            Ok(response) => (Some(response), None),
            Err(HttpClientError::CircuitOpen) => (None, Some(ErrorKind::CircuitOpen)),
            Err(e) => (e.response(), Some(ErrorKind::Other)),
        };

        Self {
            alias,
            status: response.map(Response::status_code),
            response_time: response.map(Response::response_time),
            error,
        }
    }

    /// Emit the report to the sink.
    pub(crate) fn emit(&self, metrics: &dyn Metrics) {
        let key = &self.alias;
        let mut attrs = HashMap::new();

        if let Some(elapsed) = self.response_time {
            metrics.push_to_series(&format!("{}.response_time", key), elapsed.as_secs_f64());
        }
        if let Some(status) = self.status
            && status != 0
        {
            metrics.incr_counter(&format!("{}.status.{}", key, status));
            attrs.insert("status".to_string(), status.to_string());
        }
        match self.error {
            Some(ErrorKind::CircuitOpen) => metrics.incr_counter(&format!("{}.circuit_open", key)),
            Some(ErrorKind::Other) => metrics.incr_counter(&format!("{}.errors", key)),
            None => {}
        }
        metrics.incr_counter_with_attrs(&format!("{}.total", key), &attrs);
    }

    /// Emit the report on a background task. Never blocks and never fails
    /// the caller; sink panics stay inside the task.
    pub(crate) fn spawn(self, metrics: Arc<dyn Metrics>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if catch_unwind(AssertUnwindSafe(|| self.emit(metrics.as_ref()))).is_err() {
                        warn!(alias = %self.alias, "Metrics sink panicked, report dropped");
                    }
                });
            }
            Err(_) => {
                warn!(alias = %self.alias, "No async runtime, metrics report dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::test_support::response;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        counters: Mutex<Vec<String>>,
        series: Mutex<Vec<String>>,
        attrs: Mutex<Vec<(String, HashMap<String, String>)>>,
    }

    impl Metrics for Recorder {
        fn incr_counter(&self, name: &str) {
            self.counters.lock().push(name.to_string());
        }

        fn push_to_series(&self, name: &str, _value: f64) {
            self.series.lock().push(name.to_string());
        }

        fn incr_counter_with_attrs(&self, name: &str, attributes: &HashMap<String, String>) {
            self.attrs.lock().push((name.to_string(), attributes.clone()));
        }
    }

    #[test]
    fn test_alias_from_host_url() {
        let host = Url::parse("http://host.example").unwrap();
        assert_eq!(metrics_alias("GET", "/path", Some(&host), None), "GET-host-example/path");
        assert_eq!(metrics_alias("POST", "", Some(&host), None), "POST-host-example");
        assert_eq!(metrics_alias("GET", "/a/b/", Some(&host), None), "GET-host-example/a/b");
    }

    #[test]
    fn test_alias_path_is_cleaned() {
        let host = Url::parse("http://host").unwrap();
        assert_eq!(metrics_alias("GET", "/a//b", Some(&host), None), "GET-host/a/b");
        assert_eq!(metrics_alias("GET", "a/./b/../c", Some(&host), None), "GET-host/a/c");
        assert_eq!(metrics_alias("GET", "/../..", Some(&host), None), "GET-host");
    }

    #[test]
    fn test_alias_explicit_and_fallback() {
        let host = Url::parse("http://host.example").unwrap();
        assert_eq!(metrics_alias("GET", "/path", Some(&host), Some("users.list")), "users-list");
        assert_eq!(
            metrics_alias("GET", "http://api.example/v1", None, None),
            "http://api-example/v1"
        );
    }

    #[tokio::test]
    async fn test_report_success() {
        let recorder = Recorder::default();
        Report::new("svc".into(), &Ok(response(200, "OK").await)).emit(&recorder);

        assert_eq!(*recorder.series.lock(), vec!["svc.response_time"]);
        assert_eq!(*recorder.counters.lock(), vec!["svc.status.200"]);
        let attrs = recorder.attrs.lock();
        assert_eq!(attrs[0].0, "svc.total");
        assert_eq!(attrs[0].1.get("status").map(String::as_str), Some("200"));
    }

    #[tokio::test]
    async fn test_report_status_error_counts_both() {
        let recorder = Recorder::default();
        let result = Err(HttpClientError::Status(Box::new(response(302, "").await)));
        Report::new("svc".into(), &result).emit(&recorder);

        assert_eq!(*recorder.counters.lock(), vec!["svc.status.302", "svc.errors"]);
    }

    #[test]
    fn test_report_circuit_open() {
        let recorder = Recorder::default();
        Report::new("svc".into(), &Err(HttpClientError::CircuitOpen)).emit(&recorder);

        assert!(recorder.series.lock().is_empty());
        assert_eq!(*recorder.counters.lock(), vec!["svc.circuit_open"]);
        let attrs = recorder.attrs.lock();
        assert_eq!(attrs[0].0, "svc.total");
        assert!(attrs[0].1.is_empty());
    }

    #[test]
    fn test_report_without_runtime_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        Report::new("svc".into(), &Err(HttpClientError::CircuitOpen)).spawn(recorder.clone());
        assert!(recorder.counters.lock().is_empty());
    }
}
