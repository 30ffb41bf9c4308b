//! Data access layer (C4): a storage-agnostic repository trait, backed in
//! this binary by SQLite. All read methods are wrapped by `CacheStore` at
//! the call site (see `engine::rate`); the repository itself never caches.

pub mod pool;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ApiKeyRecord, AuditRecord, Broker, Stock, VolatilitySample};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_stock(&self, ticker: &str) -> Result<Stock, RepositoryError>;
    /// Active brokers only; an inactive broker is reported as not found
    /// (§4.4) since it must not be usable for new calculations.
    async fn get_broker(&self, client_id: &str) -> Result<Broker, RepositoryError>;
    async fn latest_volatility(&self, ticker: &str) -> Result<VolatilitySample, RepositoryError>;
    async fn get_api_key(&self, key_hash: &str) -> Result<ApiKeyRecord, RepositoryError>;
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), RepositoryError>;

    /// Cheap reachability probe for the health endpoint (§6.1).
    async fn health_check(&self) -> Result<(), RepositoryError>;
}
