//! Domain entities (§3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BorrowStatus {
    Easy,
    Medium,
    Hard,
}

impl BorrowStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EASY" => Some(Self::Easy),
            "MEDIUM" => Some(Self::Medium),
            "HARD" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "EASY",
            Self::Medium => "MEDIUM",
            Self::Hard => "HARD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionFeeType {
    Flat,
    Percentage,
}

/// Stock: ingested out-of-band, read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub ticker: String,
    pub borrow_status: BorrowStatus,
    pub lender_api_id: Option<String>,
    pub min_borrow_rate: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Broker: managed out of band, read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broker {
    pub client_id: String,
    pub markup_percentage: Decimal,
    pub transaction_fee_type: TransactionFeeType,
    pub transaction_amount: Decimal,
    pub active: bool,
}

/// Append-only time series sample; core reads only the latest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilitySample {
    pub ticker: String,
    pub vol_index: Decimal,
    pub event_risk_factor: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_hash: String,
    pub client_id: String,
    pub rate_limit: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Tag recording which source supplied a value in a given calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Api,
    Cache,
    Fallback,
    StoredMinimum,
    Default,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Cache => "cache",
            Self::Fallback => "fallback",
            Self::StoredMinimum => "stored_minimum",
            Self::Default => "default",
        }
    }
}

/// Derived, non-persistent: the rate engine's output plus provenance.
#[derive(Debug, Clone)]
pub struct AdjustedRate {
    pub rate: Decimal,
    pub vol_index: Decimal,
    pub event_risk: i32,
    pub borrow_rate_source: DataSource,
    pub volatility_source: DataSource,
    pub event_risk_source: DataSource,
}

impl AdjustedRate {
    pub fn data_sources(&self) -> HashMap<String, String> {
        HashMap::from([
            ("borrow_rate".to_string(), self.borrow_rate_source.as_str().to_string()),
            ("volatility".to_string(), self.volatility_source.as_str().to_string()),
            ("event_risk".to_string(), self.event_risk_source.as_str().to_string()),
        ])
    }
}

/// Derived, non-persistent: the fee engine's output.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FeeBreakdown {
    pub borrow_cost: Decimal,
    pub markup: Decimal,
    pub transaction_fees: Decimal,
    pub total_fee: Decimal,
}

/// Append-only, 7-year retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    pub ticker: String,
    pub position_value: Decimal,
    pub loan_days: i32,
    pub borrow_rate_used: Decimal,
    pub total_fee: Decimal,
    pub data_sources: HashMap<String, String>,
    pub breakdown: HashMap<String, Decimal>,
}

impl AuditRecord {
    pub fn partition_date(&self) -> chrono::NaiveDate {
        self.timestamp.date_naive()
    }
}
