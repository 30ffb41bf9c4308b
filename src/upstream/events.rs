//! Events client: `GET /api/calendar/events?ticker={ticker}` with an
//! `X-API-Key` header, reduced to a single risk factor = the maximum
//! `risk_factor` among events within the next 30 days (§6.2).

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::clock::Clock;
use crate::config::UpstreamEndpointConfig;
use crate::rng::Rng;

use super::breaker::CircuitState;
use super::{EndpointFabric, UpstreamError};

#[derive(Debug, Deserialize)]
struct EventsResponse {
    events: Vec<CalendarEvent>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvent {
    #[allow(dead_code)]
    #[serde(rename = "type")]
    event_type: String,
    date: NaiveDate,
    risk_factor: i32,
}

pub struct EventsClient {
    http: Client,
    base_url: String,
    api_key: String,
    fabric: EndpointFabric,
    clock: Arc<dyn Clock>,
}

impl EventsClient {
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
            fabric: EndpointFabric::new("events", config, clock.clone(), rng),
            clock,
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.fabric.breaker().state()
    }

    /// Returns the reduced risk factor, clamped to `[0, 10]` per §4.5.
    pub async fn fetch_event_risk(&self, ticker: &str) -> Result<i32, UpstreamError> {
        let url = format!("{}/api/calendar/events", self.base_url);
        let today = self.clock.now().date_naive();
        let horizon = today + ChronoDuration::days(30);

        let risk = self
            .fabric
            .run(|| async {
                let response = self
                    .http
                    .get(&url)
                    .query(&[("ticker", ticker)])
                    .header("X-API-Key", &self.api_key)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(UpstreamError::BadStatus { status: response.status() });
                }

                let body: EventsResponse = response
                    .json()
                    .await
                    .map_err(|e| UpstreamError::Decode(e.to_string()))?;

                Ok(body.events)
            })
            .await?;

        let max_risk = risk
            .into_iter()
            .filter(|e| e.date >= today && e.date <= horizon)
            .map(|e| e.risk_factor)
            .max()
            .unwrap_or(0);

        Ok(max_risk.clamp(0, 10))
    }
}
