//! Per-endpoint circuit breaker (§4.2). One breaker instance guards one
//! upstream endpoint; thresholds are configured per endpoint since each
//! provider has different failure tolerance and recovery timing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    opened_at_ms: Option<i64>,
    half_open_successes: u32,
}

/// Tracks consecutive failures within a rolling window, trips to `Open` past
/// `failure_threshold`, and probes back to `Closed` after `success_threshold`
/// consecutive successes in `HalfOpen`.
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: std::sync::Arc<dyn Clock>,
    inner: Mutex<Inner>,
    failures_in_window: AtomicU32,
    window_start_ms: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: std::sync::Arc<dyn Clock>) -> Self {
        let now_ms = clock.now().timestamp_millis() as u64;
        Self {
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at_ms: None,
                half_open_successes: 0,
            }),
            failures_in_window: AtomicU32::new(0),
            window_start_ms: AtomicU64::new(now_ms),
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Whether a call is currently permitted. `Open` within the timeout
    /// blocks calls outright; once the timeout elapses the breaker moves
    /// itself to `HalfOpen` and allows a single probing call through.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = inner.opened_at_ms.unwrap_or(self.now_ms());
                let elapsed = Duration::from_millis((self.now_ms() - opened_at).max(0) as u64);
                if elapsed >= self.config.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    fn roll_window_if_needed(&self) {
        let now = self.now_ms() as u64;
        let start = self.window_start_ms.load(Ordering::SeqCst);
        if now.saturating_sub(start) > self.config.failure_window.as_millis() as u64 {
            self.window_start_ms.store(now, Ordering::SeqCst);
            self.failures_in_window.store(0, Ordering::SeqCst);
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.opened_at_ms = None;
                    inner.half_open_successes = 0;
                    self.failures_in_window.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Closed => {
                self.failures_in_window.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    /// Any failure while probing reopens the breaker and resets its timer
    /// (§4.2: "Any failure in HALF_OPEN -> OPEN, resetting the timer"),
    /// regardless of how many consecutive successes had already accrued.
    pub fn record_failure(&self) {
        self.roll_window_if_needed();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at_ms = Some(self.now_ms());
                inner.half_open_successes = 0;
                self.failures_in_window.store(0, Ordering::SeqCst);
            }
            CircuitState::Closed => {
                let count = self.failures_in_window.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at_ms = Some(self.now_ms());
                }
            }
            CircuitState::Open => {}
        }
    }
}
