//! Injected randomness, used only for retry-backoff jitter (§4.2).

use rand::Rng as _;

pub trait Rng: Send + Sync + 'static {
    /// A fraction in `[-1.0, 1.0]` representing the jitter applied to a
    /// backoff delay (the fabric scales this by its own jitter window).
    fn jitter_fraction(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRng;

impl Rng for SystemRng {
    fn jitter_fraction(&self) -> f64 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}

/// Deterministic RNG for tests.
pub struct FixedRng(pub f64);

impl Rng for FixedRng {
    fn jitter_fraction(&self) -> f64 {
        self.0
    }
}
