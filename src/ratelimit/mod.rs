//! Per-client token bucket rate limiter (C8), backed by L2 so every replica
//! enforces the same limit (§4.8: "local L1 buckets are forbidden — would
//! let each replica grant `rate_limit` tokens").

use std::sync::Arc;

use crate::cache::l2::L2Store;

pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

pub struct RateLimiter {
    l2: Arc<dyn L2Store>,
}

impl RateLimiter {
    pub fn new(l2: Arc<dyn L2Store>) -> Self {
        Self { l2 }
    }

    /// Consumes one token from `client_id`'s bucket. Capacity is
    /// `rate_limit`; refill rate is `rate_limit / 60s`, matching the
    /// "1 token per (60 / rate_limit) seconds" steady-state rate in §4.8.
    pub async fn check(&self, client_id: &str, rate_limit: u32) -> Result<RateLimitDecision, crate::cache::l2::L2Error> {
        let refill_per_sec = rate_limit as f64 / 60.0;
        let (allowed, remaining, reset_secs) = self
            .l2
            .decrement_or_refill(client_id, rate_limit, refill_per_sec)
            .await?;

        Ok(RateLimitDecision {
            allowed,
            limit: rate_limit,
            remaining,
            reset_secs: reset_secs.max(1),
        })
    }
}
