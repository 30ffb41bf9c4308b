//! Volatility client: `GET /api/market/volatility/{ticker}` with a bearer
//! token, returning the index value the rate engine feeds into the
//! volatility adjustment term (§6.2).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::clock::Clock;
use crate::config::UpstreamEndpointConfig;
use crate::rng::Rng;

use super::breaker::CircuitState;
use super::{EndpointFabric, UpstreamError};

#[derive(Debug, Deserialize)]
struct VolatilityResponse {
    value: Decimal,
    #[allow(dead_code)]
    timestamp: DateTime<Utc>,
}

pub struct VolatilityClient {
    http: Client,
    base_url: String,
    bearer_token: String,
    fabric: EndpointFabric,
}

impl VolatilityClient {
    pub fn new(
        http: Client,
        base_url: String,
        bearer_token: String,
        config: UpstreamEndpointConfig,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn Rng>,
    ) -> Self {
        Self {
            http,
            base_url,
            bearer_token,
            fabric: EndpointFabric::new("volatility", config, clock, rng),
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.fabric.breaker().state()
    }

    pub async fn fetch_index(&self, ticker: &str) -> Result<Decimal, UpstreamError> {
        let url = format!("{}/api/market/volatility/{}", self.base_url, ticker);
        self.fabric
            .run(|| async {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.bearer_token)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(UpstreamError::BadStatus { status: response.status() });
                }

                let body: VolatilityResponse = response
                    .json()
                    .await
                    .map_err(|e| UpstreamError::Decode(e.to_string()))?;

                if body.value.is_sign_negative() {
                    return Err(UpstreamError::Decode("negative volatility index".into()));
                }

                Ok(body.value)
            })
            .await
    }
}
