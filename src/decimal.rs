//! Fixed-precision decimal arithmetic (C1).
//!
//! All fee and rate math goes through this module. `rust_decimal::Decimal`
//! already carries a fixed scale and exact base-10 semantics, so "providing"
//! add/mul/div mostly means providing the crate's overflow-checked bound and
//! the shared banker's-rounding `quantize`, rather than reimplementing
//! arbitrary-precision math by hand.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// position_value(<=1e9) * rate(<1) * days(<=365) safely fits well under
/// this bound; it exists to catch genuinely malformed inputs (e.g. a
/// corrupted upstream rate) rather than to constrain legitimate requests.
pub const OVERFLOW_BOUND: i64 = 1_000_000_000_000_000_000; // 10^18

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("arithmetic overflow in {op}")]
    Overflow { op: &'static str },
    #[error("division by zero in {op}")]
    DivisionByZero { op: &'static str },
}

/// Banker's-rounds `v` to `scale` decimal places (ties-to-even), matching
/// the invariant in §3 ("rounding each to 4 decimal places using banker's
/// rounding").
pub fn quantize(v: Decimal, scale: u32) -> Decimal {
    v.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven)
}

pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, ArithmeticError> {
    a.checked_add(b).ok_or(ArithmeticError::Overflow { op: "add" })
}

pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal, ArithmeticError> {
    let out = a
        .checked_mul(b)
        .ok_or(ArithmeticError::Overflow { op: "mul" })?;
    bound_check(out, "mul")?;
    Ok(out)
}

pub fn checked_div(a: Decimal, b: Decimal) -> Result<Decimal, ArithmeticError> {
    if b.is_zero() {
        return Err(ArithmeticError::DivisionByZero { op: "div" });
    }
    a.checked_div(b).ok_or(ArithmeticError::Overflow { op: "div" })
}

fn bound_check(v: Decimal, op: &'static str) -> Result<(), ArithmeticError> {
    let bound = Decimal::from(OVERFLOW_BOUND);
    if v.abs() > bound {
        return Err(ArithmeticError::Overflow { op });
    }
    Ok(())
}
