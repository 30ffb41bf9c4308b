//! Application state (§9 redesign flag: "global mutable state becomes a
//! single `AppState` struct threaded through via dependency injection").
//! Mirrors the reference backend's single `AppState` struct pattern, but
//! every field here is a trait object or `Arc` so tests can substitute
//! fakes for the clock, RNG, upstream clients, and repository.

use std::sync::Arc;

use crate::audit::AuditHandle;
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::Config;
use crate::engine::rate::RateEngine;
use crate::ratelimit::RateLimiter;
use crate::repository::Repository;
use crate::rng::Rng;

pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn Repository>,
    pub cache: Arc<CacheStore>,
    pub rate_engine: Arc<RateEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: AuditHandle,
    pub clock: Arc<dyn Clock>,
    pub rng: Arc<dyn Rng>,
}
