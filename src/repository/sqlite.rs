//! SQLite-backed `Repository` implementation. Decimal columns are stored as
//! `TEXT` (SQLite has no native decimal type) and parsed back via
//! `Decimal::from_str_exact` so no precision is lost on the round trip.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::models::{ApiKeyRecord, AuditRecord, BorrowStatus, Broker, Stock, TransactionFeeType, VolatilitySample};

use super::pool::SqlitePool;
use super::{Repository, RepositoryError};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS stocks (
    ticker          TEXT PRIMARY KEY,
    borrow_status   TEXT NOT NULL,
    lender_api_id   TEXT,
    min_borrow_rate TEXT NOT NULL,
    last_updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS brokers (
    client_id            TEXT PRIMARY KEY,
    markup_percentage     TEXT NOT NULL,
    transaction_fee_type  TEXT NOT NULL,
    transaction_amount    TEXT NOT NULL,
    active                INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS volatility_samples (
    ticker            TEXT NOT NULL,
    vol_index         TEXT NOT NULL,
    event_risk_factor INTEGER NOT NULL,
    sampled_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_volatility_ticker_time
    ON volatility_samples(ticker, sampled_at DESC);

CREATE TABLE IF NOT EXISTS api_keys (
    key_hash   TEXT PRIMARY KEY,
    client_id  TEXT NOT NULL,
    rate_limit INTEGER NOT NULL,
    expires_at TEXT
);

CREATE TABLE IF NOT EXISTS audit_records (
    audit_id         TEXT PRIMARY KEY,
    recorded_at      TEXT NOT NULL,
    partition_date   TEXT NOT NULL,
    client_id        TEXT NOT NULL,
    ticker           TEXT NOT NULL,
    position_value   TEXT NOT NULL,
    loan_days        INTEGER NOT NULL,
    borrow_rate_used TEXT NOT NULL,
    total_fee        TEXT NOT NULL,
    data_sources     TEXT NOT NULL,
    breakdown        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_client_partition
    ON audit_records(client_id, partition_date);
"#;

pub struct SqliteRepository {
    pool: SqlitePool,
}

fn decimal_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str_exact(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

impl SqliteRepository {
    pub async fn open(db_path: &str, pool_size: usize) -> anyhow::Result<Self> {
        let pool = SqlitePool::open(db_path, pool_size)?;
        pool.with_connection(|conn| conn.execute_batch(SCHEMA_SQL)).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePool::open_in_memory(1)?;
        pool.with_connection(|conn| conn.execute_batch(SCHEMA_SQL)).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_stock(&self, ticker: &str) -> Result<Stock, RepositoryError> {
        let ticker = ticker.to_string();
        let row = self
            .pool
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT ticker, borrow_status, lender_api_id, min_borrow_rate, last_updated \
                     FROM stocks WHERE ticker = ?1",
                    params![ticker],
                    |row| {
                        let status_raw: String = row.get(1)?;
                        let last_updated_raw: String = row.get(4)?;
                        Ok((
                            row.get::<_, String>(0)?,
                            status_raw,
                            row.get::<_, Option<String>>(2)?,
                            decimal_col(row, 3)?,
                            last_updated_raw,
                        ))
                    },
                )
                .optional()
            })
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let (ticker, status_raw, lender_api_id, min_borrow_rate, last_updated_raw) =
            row.ok_or(RepositoryError::NotFound)?;

        Ok(Stock {
            ticker,
            borrow_status: BorrowStatus::parse(&status_raw).ok_or_else(|| {
                RepositoryError::Storage(format!("unrecognized borrow_status '{status_raw}'"))
            })?,
            lender_api_id,
            min_borrow_rate,
            last_updated: DateTime::parse_from_rfc3339(&last_updated_raw)
                .map_err(|e| RepositoryError::Storage(e.to_string()))?
                .with_timezone(&Utc),
        })
    }

    async fn get_broker(&self, client_id: &str) -> Result<Broker, RepositoryError> {
        let client_id = client_id.to_string();
        let row = self
            .pool
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT client_id, markup_percentage, transaction_fee_type, transaction_amount, active \
                     FROM brokers WHERE client_id = ?1 AND active = 1",
                    params![client_id],
                    |row| {
                        let fee_type_raw: String = row.get(2)?;
                        Ok((
                            row.get::<_, String>(0)?,
                            decimal_col(row, 1)?,
                            fee_type_raw,
                            decimal_col(row, 3)?,
                        ))
                    },
                )
                .optional()
            })
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let (client_id, markup_percentage, fee_type_raw, transaction_amount) =
            row.ok_or(RepositoryError::NotFound)?;

        let transaction_fee_type = match fee_type_raw.as_str() {
            "FLAT" => TransactionFeeType::Flat,
            "PERCENTAGE" => TransactionFeeType::Percentage,
            other => return Err(RepositoryError::Storage(format!("unrecognized transaction_fee_type '{other}'"))),
        };

        Ok(Broker {
            client_id,
            markup_percentage,
            transaction_fee_type,
            transaction_amount,
            active: true,
        })
    }

    async fn latest_volatility(&self, ticker: &str) -> Result<VolatilitySample, RepositoryError> {
        let ticker_owned = ticker.to_string();
        let row = self
            .pool
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT ticker, vol_index, event_risk_factor, sampled_at FROM volatility_samples \
                     WHERE ticker = ?1 ORDER BY sampled_at DESC LIMIT 1",
                    params![ticker_owned],
                    |row| {
                        let sampled_at_raw: String = row.get(3)?;
                        Ok((row.get::<_, String>(0)?, decimal_col(row, 1)?, row.get::<_, i32>(2)?, sampled_at_raw))
                    },
                )
                .optional()
            })
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let (ticker, vol_index, event_risk_factor, sampled_at_raw) = row.ok_or(RepositoryError::NotFound)?;

        Ok(VolatilitySample {
            ticker,
            vol_index,
            event_risk_factor,
            timestamp: DateTime::parse_from_rfc3339(&sampled_at_raw)
                .map_err(|e| RepositoryError::Storage(e.to_string()))?
                .with_timezone(&Utc),
        })
    }

    async fn get_api_key(&self, key_hash: &str) -> Result<ApiKeyRecord, RepositoryError> {
        let key_hash_owned = key_hash.to_string();
        let row = self
            .pool
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT key_hash, client_id, rate_limit, expires_at FROM api_keys WHERE key_hash = ?1",
                    params![key_hash_owned],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, u32>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()
            })
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let (key_hash, client_id, rate_limit, expires_at_raw) = row.ok_or(RepositoryError::NotFound)?;

        let expires_at = expires_at_raw
            .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        Ok(ApiKeyRecord { key_hash, client_id, rate_limit, expires_at })
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), RepositoryError> {
        let record = record.clone();
        let data_sources_json =
            serde_json::to_string(&record.data_sources).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let breakdown_json: HashMap<String, String> =
            record.breakdown.iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
        let breakdown_json =
            serde_json::to_string(&breakdown_json).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let partition_date: NaiveDate = record.partition_date();

        self.pool
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO audit_records \
                     (audit_id, recorded_at, partition_date, client_id, ticker, position_value, loan_days, \
                      borrow_rate_used, total_fee, data_sources, breakdown) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                     ON CONFLICT(audit_id) DO NOTHING",
                    params![
                        record.audit_id.to_string(),
                        record.timestamp.to_rfc3339(),
                        partition_date.to_string(),
                        record.client_id,
                        record.ticker,
                        record.position_value.to_string(),
                        record.loan_days,
                        record.borrow_rate_used.to_string(),
                        record.total_fee.to_string(),
                        data_sources_json,
                        breakdown_json,
                    ],
                )
            })
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        self.pool
            .with_connection(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }
}
