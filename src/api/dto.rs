//! Wire types for the three HTTP endpoints (§6.1). `Decimal` fields rely on
//! `rust_decimal`'s serde impl, which emits JSON strings rather than numbers
//! to avoid the precision loss a JSON-number rendering would risk -- the
//! "implementations that risk lossy serialization must emit strings
//! instead" clause, applied uniformly rather than case-by-case.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{AdjustedRate, FeeBreakdown, Stock};

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    pub ticker: String,
    pub position_value: Decimal,
    pub loan_days: i32,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeBreakdownView {
    pub borrow_cost: Decimal,
    pub markup: Decimal,
    pub transaction_fees: Decimal,
}

impl From<&FeeBreakdown> for FeeBreakdownView {
    fn from(b: &FeeBreakdown) -> Self {
        Self {
            borrow_cost: b.borrow_cost,
            markup: b.markup,
            transaction_fees: b.transaction_fees,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub status: &'static str,
    pub total_fee: Decimal,
    pub breakdown: FeeBreakdownView,
    pub borrow_rate_used: Decimal,
}

impl CalculateResponse {
    pub fn new(fee: &FeeBreakdown, borrow_rate_used: Decimal) -> Self {
        Self {
            status: "success",
            total_fee: fee.total_fee,
            breakdown: FeeBreakdownView::from(fee),
            borrow_rate_used,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RatesResponse {
    pub ticker: String,
    pub current_rate: Decimal,
    pub borrow_status: &'static str,
    pub volatility_index: Decimal,
    pub event_risk_factor: i32,
    pub last_updated: DateTime<Utc>,
}

impl RatesResponse {
    pub fn new(stock: &Stock, adjusted: &AdjustedRate) -> Self {
        Self {
            ticker: stock.ticker.clone(),
            current_rate: adjusted.rate,
            borrow_status: stock.borrow_status.as_str(),
            volatility_index: adjusted.vol_index,
            event_risk_factor: adjusted.event_risk,
            last_updated: stock.last_updated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub failed_components: Vec<&'static str>,
}
