//! Call-scoped request context.

use std::time::Duration;
use tokio::time::Instant;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Typed values threaded through a single call.
///
/// Transports receive the context alongside every outbound request; the
/// request pipeline uses the deadline to bound the whole call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    request_id: Option<String>,
    deadline: Option<Instant>,
    budget: Option<Duration>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a request correlation id.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.request_id = if id.is_empty() { None } else { Some(id) };
        self
    }

    /// Set an absolute deadline for the call.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self.budget = Some(deadline.saturating_duration_since(Instant::now()));
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.budget = Some(timeout);
        self
    }

    /// The request correlation id, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The call deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time the caller allowed when the deadline was set.
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Time left until the deadline. `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
