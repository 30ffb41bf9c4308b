//! Upstream client fabric (C2): timeout, retry and circuit breaking wrapped
//! around three heterogeneous securities-data providers. Each client owns
//! its own breaker instance; the rate engine only ever sees a typed result
//! or an `UpstreamError` it can turn into a provenance fallback.

pub mod breaker;
pub mod events;
pub mod retry;
pub mod seclend;
pub mod volatility;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::UpstreamEndpointConfig;
use crate::rng::Rng;
use breaker::CircuitBreaker;
use retry::{FromTimeout, RetryOutcome};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("circuit breaker open for {endpoint}")]
    BreakerOpen { endpoint: &'static str },
    #[error("upstream call timed out")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {status}")]
    BadStatus { status: StatusCode },
    #[error("upstream returned an unparseable body: {0}")]
    Decode(String),
}

impl FromTimeout for UpstreamError {
    fn from_timeout() -> Self {
        UpstreamError::Timeout
    }
}

fn classify(err: &UpstreamError) -> RetryOutcome {
    match err {
        UpstreamError::Timeout | UpstreamError::Transport(_) => RetryOutcome::Retryable,
        UpstreamError::BadStatus { status } if status.is_server_error() => RetryOutcome::Retryable,
        UpstreamError::BadStatus { status } if *status == StatusCode::TOO_MANY_REQUESTS => RetryOutcome::Retryable,
        _ => RetryOutcome::Fatal,
    }
}

/// Shared scaffolding every upstream client wraps its HTTP call with: breaker
/// gate, retry-with-backoff, and breaker bookkeeping on the outcome.
pub struct EndpointFabric {
    name: &'static str,
    config: UpstreamEndpointConfig,
    breaker: CircuitBreaker,
    rng: Arc<dyn Rng>,
}

impl EndpointFabric {
    pub fn new(name: &'static str, config: UpstreamEndpointConfig, clock: Arc<dyn Clock>, rng: Arc<dyn Rng>) -> Self {
        Self {
            name,
            breaker: CircuitBreaker::new(config.breaker, clock),
            config,
            rng,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs `call` through the breaker gate and retry fabric. `call` should
    /// perform exactly one upstream HTTP round trip per invocation.
    pub async fn run<T, F, Fut>(&self, call: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, UpstreamError>>,
    {
        if !self.breaker.allow_request() {
            return Err(UpstreamError::BreakerOpen { endpoint: self.name });
        }

        let result = retry::call_with_retry(self.name, self.config.timeout, self.rng.as_ref(), call, classify).await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(UpstreamError::BreakerOpen { .. }) => {}
            Err(_) => self.breaker.record_failure(),
        }

        result
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}
