//! Pricing pipeline: rate derivation (C5) feeding the fee calculation (C6).

pub mod fee;
pub mod rate;
