//! SecLend client: `GET /api/borrows/{ticker}` with an `X-API-Key` header,
//! returning the base borrow rate and a qualitative borrow-status hint
//! (§6.2). The status is informational only — the rate is what feeds the
//! pricing pipeline.

use std::sync::Arc;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::clock::Clock;
use crate::config::UpstreamEndpointConfig;
use crate::models::BorrowStatus;
use crate::rng::Rng;

use super::breaker::CircuitState;
use super::{EndpointFabric, UpstreamError};

#[derive(Debug, Deserialize)]
struct SecLendResponse {
    rate: Decimal,
    status: Option<String>,
}

pub struct SecLendRate {
    pub rate: Decimal,
    pub status: Option<BorrowStatus>,
}

pub struct SecLendClient {
    http: Client,
    base_url: String,
    api_key: String,
    fabric: EndpointFabric,
}

impl SecLendClient {
    pub fn new(
        http: Client,
        base_url: String,
        api_key: String,
        config: UpstreamEndpointConfig,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn Rng>,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key,
            fabric: EndpointFabric::new("seclend", config, clock, rng),
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.fabric.breaker().state()
    }

    pub async fn fetch_rate(&self, ticker: &str) -> Result<SecLendRate, UpstreamError> {
        let url = format!("{}/api/borrows/{}", self.base_url, ticker);
        let result = self
            .fabric
            .run(|| async {
                let response = self
                    .http
                    .get(&url)
                    .header("X-API-Key", &self.api_key)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(UpstreamError::BadStatus { status: response.status() });
                }

                let body: SecLendResponse = response
                    .json()
                    .await
                    .map_err(|e| UpstreamError::Decode(e.to_string()))?;

                // Negative or NaN rates are transient-failure signals, not
                // valid quotes (§4.5 edge policies).
                if body.rate.is_sign_negative() {
                    return Err(UpstreamError::Decode("negative rate".into()));
                }

                Ok(body)
            })
            .await?;

        Ok(SecLendRate {
            rate: result.rate,
            status: result.status.as_deref().and_then(BorrowStatus::parse),
        })
    }
}
