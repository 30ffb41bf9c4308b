//! Request validation (C7). Rules run in the fixed order from §4.7; the
//! first violation wins so responses are deterministic regardless of which
//! other fields are also invalid.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::ApiError;

static TICKER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9.\-]+$").unwrap());
static CLIENT_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap());

const MAX_POSITION_VALUE: Decimal = dec!(1_000_000_000);

pub struct LocateRequestFields<'a> {
    pub ticker: &'a str,
    pub position_value: Decimal,
    pub loan_days: i32,
    pub client_id: &'a str,
}

/// Uppercases the ticker as a side effect of validating it, since every
/// downstream lookup keys on the uppercased form.
pub fn validate(fields: &LocateRequestFields<'_>) -> Result<String, ApiError> {
    let ticker = fields.ticker.trim();
    if ticker.is_empty() || ticker.len() > 10 {
        return Err(invalid("ticker", "ticker must be 1-10 characters"));
    }
    let upper_ticker = ticker.to_ascii_uppercase();
    if !TICKER_PATTERN.is_match(&upper_ticker) {
        return Err(invalid("ticker", "ticker must match [A-Z0-9.-]+"));
    }

    if fields.position_value <= Decimal::ZERO || fields.position_value > MAX_POSITION_VALUE {
        return Err(invalid("position_value", "position_value must be positive and at most 1e9"));
    }

    if !(1..=365).contains(&fields.loan_days) {
        return Err(invalid("loan_days", "loan_days must be an integer in [1, 365]"));
    }

    let client_id = fields.client_id.trim();
    if client_id.is_empty() || client_id.len() > 50 {
        return Err(invalid("client_id", "client_id must be 1-50 characters"));
    }
    if !CLIENT_ID_PATTERN.is_match(client_id) {
        return Err(invalid("client_id", "client_id must match [A-Za-z0-9_-]+"));
    }

    Ok(upper_ticker)
}

fn invalid(field: &str, message: &str) -> ApiError {
    ApiError::InvalidParameter { field: field.to_string(), message: message.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields<'a>(ticker: &'a str, position_value: Decimal, loan_days: i32, client_id: &'a str) -> LocateRequestFields<'a> {
        LocateRequestFields { ticker, position_value, loan_days, client_id }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate(&fields("aapl", dec!(100000), 30, "xyz123")).is_ok());
    }

    #[test]
    fn rejects_empty_ticker() {
        let err = validate(&fields("", dec!(1), 1, "x")).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }

    #[test]
    fn rejects_oversized_position_value() {
        let err = validate(&fields("AAPL", dec!(2_000_000_000), 1, "x")).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }

    #[test]
    fn rejects_loan_days_out_of_range() {
        assert!(validate(&fields("AAPL", dec!(1000), 0, "x")).is_err());
        assert!(validate(&fields("AAPL", dec!(1000), 366, "x")).is_err());
    }

    #[test]
    fn ticker_validation_precedes_position_value_validation() {
        // Both fields are invalid; the ticker error must win since it's
        // checked first (§4.7's "on fail, return the first offending one").
        let err = validate(&fields("bad ticker!", dec!(-1), 30, "x")).unwrap_err();
        match err {
            ApiError::InvalidParameter { field, .. } => assert_eq!(field, "ticker"),
            _ => panic!("expected InvalidParameter"),
        }
    }
}
