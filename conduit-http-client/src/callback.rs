//! Callback chain around request execution.
//!
//! A [`Callback`] wraps "the rest of the chain", handed to it as [`Next`].
//! It may call [`Next::run`] once, several times (retries) or not at all
//! (short-circuit), and may inspect or replace the result.
//!
//! Callbacks registered later wrap the ones registered earlier: for a chain
//! built as `[a, b]`, executing `f` is `b(|| a(f))`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use crate::{RequestInfo, Response, Result};

/// Interceptor wrapped around request execution.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Handle the call, delegating to `next` as needed.
    async fn call(&self, next: Next<'_>) -> Result<Response>;
}

/// Terminal action at the innermost end of a chain.
pub(crate) trait Terminal: Send + Sync {
    fn dispatch(&self) -> BoxFuture<'_, Result<Response>>;
}

/// The rest of the chain, as seen by a callback.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    callbacks: &'a [Arc<dyn Callback>],
    terminal: &'a dyn Terminal,
    info: &'a RequestInfo,
}

impl<'a> Next<'a> {
    /// The call being executed.
    pub fn request(&self) -> &'a RequestInfo {
        self.info
    }

    /// Run the rest of the chain. May be called repeatedly.
    pub async fn run(&self) -> Result<Response> {
        match self.callbacks.split_last() {
            Some((outer, inner)) => {
                let next = Next {
                    callbacks: inner,
                    ..*self
                };
                outer.call(next).await
            }
            None => self.terminal.dispatch().await,
        }
    }
}

/// Ordered composition of callbacks.
#[derive(Clone, Default)]
pub struct CallbackChain {
    callbacks: Vec<Arc<dyn Callback>>,
}

impl CallbackChain {
    /// Create an empty chain. The empty chain runs the terminal directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose `callback` around the existing chain, making it the outermost layer.
    pub fn chained(mut self, callback: Arc<dyn Callback>) -> Self {
        self.push(callback);
        self
    }

    /// In-place form of [`chained`](Self::chained).
    pub fn push(&mut self, callback: Arc<dyn Callback>) {
        self.callbacks.push(callback);
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether the chain is the identity.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub(crate) async fn run(&self, info: &RequestInfo, terminal: &dyn Terminal) -> Result<Response> {
        Next {
            callbacks: &self.callbacks,
            terminal,
            info,
        }
        .run()
        .await
    }
}

impl std::fmt::Debug for CallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackChain")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

/// Callback that logs each call and its outcome through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingCallback {
    log_headers: bool,
}

impl LoggingCallback {
    /// Create a new logging callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable logging of response headers.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

#[async_trait]
impl Callback for LoggingCallback {
    async fn call(&self, next: Next<'_>) -> Result<Response> {
        let info = next.request();
        debug!(method = %info.method(), url = %info.url(), "Sending HTTP request");

        let result = next.run().await;
        match &result {
            Ok(response) => {
                debug!(
                    status = %response.status(),
                    elapsed = ?response.response_time(),
                    "Received HTTP response"
                );
                if self.log_headers {
                    for (name, value) in response.headers() {
                        tracing::trace!(header = %name, value = ?value, "Response header");
                    }
                }
            }
            Err(e) => debug!(error = %e, "HTTP request failed"),
        }

        result
    }
}
