//! Key normalization: uppercasing tickers and fixed-scale decimal formatting
//! happen here so equivalent inputs collide correctly (§4.3).

use rust_decimal::Decimal;

use super::Namespace;

/// Normalizes a raw key for the given namespace. Namespaces keyed purely by
/// ticker are uppercased; `locate_fee` keys are pre-built by
/// [`locate_fee_key`] and passed through unchanged.
pub fn normalize(namespace: Namespace, raw: &str) -> String {
    match namespace {
        Namespace::LocateFee => raw.to_string(),
        _ => raw.trim().to_ascii_uppercase(),
    }
}

/// Builds the composite `locate_fee` cache key from the components that
/// determine a fee calculation's result, per the key-shape column in §4.3.
pub fn locate_fee_key(
    ticker: &str,
    position_value: Decimal,
    loan_days: i32,
    markup_percentage: Decimal,
    fee_type: &str,
    transaction_amount: Decimal,
) -> String {
    format!(
        "{}:{:.2}:{}:{:.2}:{}:{:.2}",
        ticker.trim().to_ascii_uppercase(),
        position_value,
        loan_days,
        markup_percentage,
        fee_type,
        transaction_amount,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ticker_keys_collide_case_insensitively() {
        assert_eq!(
            normalize(Namespace::BorrowRate, "aapl"),
            normalize(Namespace::BorrowRate, "AAPL")
        );
    }

    #[test]
    fn locate_fee_key_is_stable_for_equivalent_decimals() {
        let a = locate_fee_key("aapl", dec!(100000), 30, dec!(5), "FLAT", dec!(25));
        let b = locate_fee_key("AAPL", dec!(100000.00), 30, dec!(5.0), "FLAT", dec!(25.00));
        assert_eq!(a, b);
    }
}
