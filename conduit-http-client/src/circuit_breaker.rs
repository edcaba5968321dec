//! Circuit breaker policy and its chain callback.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::callback::{Callback, Next};
use crate::{HttpClientError, Response, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, requests are let through to check for recovery.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Error percentage (0-100) in the window that opens the circuit.
    pub error_percent_threshold_to_open: u32,
    /// Minimum requests in the window before the circuit may open.
    pub minimum_requests_to_open: u32,
    /// Successful requests needed in half-open state to close the circuit.
    pub successful_required_on_half_open: u32,
    /// Time to wait in open state before probing.
    pub wait_duration_in_open_state: Duration,
    /// Number of buckets in the sliding metrics window.
    pub metrics_sliding_window_bucket_quantity: usize,
    /// Duration covered by each bucket.
    pub metrics_bucket_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_percent_threshold_to_open: 50,
            minimum_requests_to_open: 20,
            successful_required_on_half_open: 1,
            wait_duration_in_open_state: Duration::from_secs(5),
            metrics_sliding_window_bucket_quantity: 10,
            metrics_bucket_duration: Duration::from_secs(1),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker config.
    pub fn new(error_percent_threshold_to_open: u32, minimum_requests_to_open: u32) -> Self {
        Self {
            error_percent_threshold_to_open,
            minimum_requests_to_open,
            ..Default::default()
        }
    }

    /// Set the wait duration in open state.
    pub fn with_wait_duration(mut self, wait: Duration) -> Self {
        self.wait_duration_in_open_state = wait;
        self
    }

    /// Set the successes required to close from half-open.
    pub fn with_successful_required_on_half_open(mut self, count: u32) -> Self {
        self.successful_required_on_half_open = count;
        self
    }

    /// Set the sliding window shape.
    pub fn with_window(mut self, buckets: usize, bucket_duration: Duration) -> Self {
        self.metrics_sliding_window_bucket_quantity = buckets;
        self.metrics_bucket_duration = bucket_duration;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    total: u32,
    errors: u32,
}

/// Sliding window of request outcomes.
#[derive(Debug)]
struct Window {
    buckets: VecDeque<Bucket>,
    quantity: usize,
    bucket_duration: Duration,
}

impl Window {
    fn new(quantity: usize, bucket_duration: Duration) -> Self {
        Self {
            buckets: VecDeque::with_capacity(quantity.max(1)),
            quantity: quantity.max(1),
            bucket_duration,
        }
    }

    fn record(&mut self, now: Instant, error: bool) {
        self.expire(now);
        let stale = self
            .buckets
            .back()
            .is_none_or(|bucket| now.duration_since(bucket.started) >= self.bucket_duration);
        if stale {
            if self.buckets.len() == self.quantity {
                self.buckets.pop_front();
            }
            self.buckets.push_back(Bucket {
                started: now,
                total: 0,
                errors: 0,
            });
        }

        if let Some(current) = self.buckets.back_mut() {
            current.total += 1;
            if error {
                current.errors += 1;
            }
        }
    }

    fn expire(&mut self, now: Instant) {
        let span = self.bucket_duration * self.quantity as u32;
        while let Some(front) = self.buckets.front() {
            if now.duration_since(front.started) >= span {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Total requests and error percentage.
    fn stats(&mut self, now: Instant) -> (u32, u32) {
        self.expire(now);
        let (total, errors) = self
            .buckets
            .iter()
            .fold((0, 0), |(t, e), b| (t + b.total, e + b.errors));
        let percent = if total == 0 { 0 } else { errors * 100 / total };
        (total, percent)
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

/// Circuit breaker implementation.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    window: Mutex<Window>,
    half_open_successes: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = Window::new(
            config.metrics_sliding_window_bucket_quantity,
            config.metrics_bucket_duration,
        );
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            window: Mutex::new(window),
            half_open_successes: AtomicU32::new(0),
            opened_at: RwLock::new(None),
        }
    }

    /// Get the breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        *self.state.read()
    }

    /// Check if a request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let state = *self.state.read();

        match state {
            CircuitState::Closed => {
                self.window.lock().record(Instant::now(), false);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.successful_required_on_half_open {
                    self.close();
                }
            }
            CircuitState::Open => {
                debug!("Success recorded while circuit open, ignoring");
            }
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        let state = *self.state.read();

        match state {
            CircuitState::Closed => {
                let now = Instant::now();
                let mut window = self.window.lock();
                window.record(now, true);
                let (total, percent) = window.stats(now);
                drop(window);

                if total >= self.config.minimum_requests_to_open
                    && percent >= self.config.error_percent_threshold_to_open
                {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing reopens the circuit
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    /// Open the circuit.
    fn open(&self) {
        let mut state = self.state.write();
        if *state != CircuitState::Open {
            warn!("Circuit breaker opening");
            *state = CircuitState::Open;
            *self.opened_at.write() = Some(Instant::now());
            self.half_open_successes.store(0, Ordering::SeqCst);
        }
    }

    /// Close the circuit.
    fn close(&self) {
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            info!("Circuit breaker closing");
            *state = CircuitState::Closed;
            *self.opened_at.write() = None;
            self.window.lock().reset();
            self.half_open_successes.store(0, Ordering::SeqCst);
        }
    }

    /// Transition to half-open if the open wait has elapsed.
    fn maybe_transition_to_half_open(&self) {
        let state = *self.state.read();
        if state != CircuitState::Open {
            return;
        }

        let opened_at = *self.opened_at.read();
        if let Some(opened) = opened_at
            && opened.elapsed() >= self.config.wait_duration_in_open_state
        {
            let mut state = self.state.write();
            if *state == CircuitState::Open {
                debug!("Circuit breaker transitioning to half-open");
                *state = CircuitState::HalfOpen;
                self.half_open_successes.store(0, Ordering::SeqCst);
            }
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.close();
    }
}

/// Chain callback that guards the rest of the chain with a [`CircuitBreaker`].
///
/// Rejected calls return [`HttpClientError::CircuitOpen`] without running the
/// rest of the chain.
#[derive(Debug, Clone)]
pub struct CircuitBreakerCallback {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerCallback {
    /// Create a callback with a fresh breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_breaker(Arc::new(CircuitBreaker::new(config)))
    }

    /// Create a callback around a shared breaker.
    pub fn with_breaker(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    /// Get the guarded breaker.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl Callback for CircuitBreakerCallback {
    async fn call(&self, next: Next<'_>) -> Result<Response> {
        if !self.breaker.is_allowed() {
            return Err(HttpClientError::CircuitOpen);
        }

        let result = next.run().await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(HttpClientError::CircuitOpen) => {}
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}
