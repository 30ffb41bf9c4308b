//! Injected clock so TTL/breaker-timeout logic is deterministic in tests.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
    fn instant(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests: starts at the real wall time but only
/// `instant()` is steppable, since `Instant` cannot be manufactured from an
/// arbitrary offset in stable Rust.
pub struct FixedClock {
    base_instant: Instant,
    base_wall: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl FixedClock {
    pub fn new(base_wall: DateTime<Utc>) -> Self {
        Self {
            base_instant: Instant::now(),
            base_wall,
            offset_ms: AtomicI64::new(0),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.offset_ms
            .fetch_add(d.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let off = self.offset_ms.load(Ordering::SeqCst);
        self.base_wall + chrono::Duration::milliseconds(off)
    }

    fn instant(&self) -> Instant {
        let off = self.offset_ms.load(Ordering::SeqCst);
        self.base_instant + Duration::from_millis(off.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_both_views() {
        let clock = FixedClock::new(Utc::now());
        let wall0 = clock.now();
        let inst0 = clock.instant();
        clock.advance(Duration::from_secs(5));
        assert!(clock.now() > wall0);
        assert!(clock.instant() > inst0);
    }
}
