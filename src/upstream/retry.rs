//! Timeout + bounded exponential backoff retry, wrapping a single upstream
//! call. Mirrors `execute_with_retry`'s shape in the reference scraper client
//! (fixed attempt budget, doubling backoff capped at a ceiling, jittered so a
//! fleet of callers doesn't retry in lockstep).

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::rng::Rng;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The error is worth retrying (timeout, connection failure, 5xx).
    Retryable,
    /// The error is final; retrying would not help (4xx, malformed body).
    Fatal,
}

/// Runs `attempt` up to `MAX_RETRIES` times with `timeout_per_call` applied
/// to each try. `classify` turns a returned error into [`RetryOutcome`]; a
/// `Fatal` classification short-circuits the remaining attempts.
pub async fn call_with_retry<T, E, F, Fut>(
    endpoint_name: &str,
    timeout_per_call: Duration,
    rng: &dyn Rng,
    mut attempt: F,
    classify: impl Fn(&E) -> RetryOutcome,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + FromTimeout,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for try_number in 0..MAX_RETRIES {
        let result = match timeout(timeout_per_call, attempt()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(endpoint = endpoint_name, try_number, "upstream call timed out");
                Err(E::from_timeout())
            }
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                let outcome = classify(&e);
                if outcome == RetryOutcome::Fatal || try_number == MAX_RETRIES - 1 {
                    return Err(e);
                }
                let jitter = 1.0 + rng.jitter_fraction() * 0.1;
                let sleep_ms = ((backoff_ms as f64) * jitter).max(1.0) as u64;
                debug!(endpoint = endpoint_name, try_number, sleep_ms, error = %e, "retrying after backoff");
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }

    unreachable!("loop always returns within MAX_RETRIES iterations")
}

/// Lets `call_with_retry` manufacture an error value for the timeout case
/// without knowing the concrete upstream error type.
pub trait FromTimeout {
    fn from_timeout() -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FixedRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(&'static str);
    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl FromTimeout for TestError {
        fn from_timeout() -> Self {
            TestError("timeout")
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let rng = FixedRng(0.0);
        let attempts = AtomicU32::new(0);
        let result = call_with_retry(
            "test",
            Duration::from_millis(50),
            &rng,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| RetryOutcome::Retryable,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_short_circuits_retries() {
        let rng = FixedRng(0.0);
        let attempts = AtomicU32::new(0);
        let result: Result<i32, TestError> = call_with_retry(
            "test",
            Duration::from_millis(50),
            &rng,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(TestError("bad request")) }
            },
            |_| RetryOutcome::Fatal,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
