//! Fee engine (C6): pure, deterministic decimal arithmetic combining the
//! effective annual rate with a client's commercial terms into a locate fee
//! breakdown (§4.6). Every intermediate is quantized to 4 dp before the
//! next step consumes it.

use rust_decimal::Decimal;

use crate::decimal::{checked_add, checked_div, checked_mul, quantize, ArithmeticError};
use crate::models::{Broker, FeeBreakdown, TransactionFeeType};

const FEE_SCALE: u32 = 4;

/// Computes the locate fee breakdown. Negative intermediates are impossible
/// given validated inputs (position_value > 0, loan_days in [1,365], rate
/// >= min_borrow_rate >= 0); if one is observed anyway it's a bug, not a
/// user error, so it surfaces as `ArithmeticError` rather than being
/// silently clamped.
pub fn calculate_fee(
    position_value: Decimal,
    loan_days: i32,
    annual_rate: Decimal,
    broker: &Broker,
) -> Result<FeeBreakdown, ArithmeticError> {
    // Kept at full precision rather than quantized: §8's S1 walk-through is
    // explicit that the daily rate is "quantized to 0.0002 only at display"
    // and that internal math carries at least 10 dp, so only `borrow_cost`
    // itself gets rounded.
    let daily_rate = checked_div(annual_rate, Decimal::from(365))?;

    let borrow_cost = quantize(
        checked_mul(checked_mul(position_value, daily_rate)?, Decimal::from(loan_days))?,
        FEE_SCALE,
    );
    reject_negative(borrow_cost, "borrow_cost")?;

    let markup_fraction = checked_div(broker.markup_percentage, Decimal::from(100))?;
    let markup = quantize(checked_mul(borrow_cost, markup_fraction)?, FEE_SCALE);
    reject_negative(markup, "markup")?;

    let transaction_fees = match broker.transaction_fee_type {
        TransactionFeeType::Flat => quantize(broker.transaction_amount, FEE_SCALE),
        TransactionFeeType::Percentage => {
            let fraction = checked_div(broker.transaction_amount, Decimal::from(100))?;
            quantize(checked_mul(position_value, fraction)?, FEE_SCALE)
        }
    };
    reject_negative(transaction_fees, "transaction_fees")?;

    let total_fee = quantize(checked_add(checked_add(borrow_cost, markup)?, transaction_fees)?, FEE_SCALE);
    reject_negative(total_fee, "total_fee")?;

    Ok(FeeBreakdown { borrow_cost, markup, transaction_fees, total_fee })
}

fn reject_negative(v: Decimal, op: &'static str) -> Result<(), ArithmeticError> {
    if v.is_sign_negative() && !v.is_zero() {
        return Err(ArithmeticError::Overflow { op });
    }
    Ok(())
}
