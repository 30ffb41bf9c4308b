//! Rate engine (C5): produces the effective annual borrow rate for a
//! ticker, recording where each input came from so the response (and the
//! audit trail) can prove its own provenance.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

use crate::cache::{CacheStore, Namespace};
use crate::config::Config;
use crate::decimal::{checked_add, checked_div, checked_mul, quantize, ArithmeticError};
use crate::error::ApiError;
use crate::models::{AdjustedRate, BorrowStatus, DataSource, Stock};
use crate::repository::{Repository, RepositoryError};
use crate::upstream::events::EventsClient;
use crate::upstream::seclend::SecLendClient;
use crate::upstream::volatility::VolatilityClient;

pub struct RateEngine {
    repo: Arc<dyn Repository>,
    cache: Arc<CacheStore>,
    config: Arc<Config>,
    seclend: SecLendClient,
    volatility: VolatilityClient,
    events: EventsClient,
}

impl RateEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        cache: Arc<CacheStore>,
        config: Arc<Config>,
        seclend: SecLendClient,
        volatility: VolatilityClient,
        events: EventsClient,
    ) -> Self {
        Self { repo, cache, config, seclend, volatility, events }
    }

    /// Runs the full §4.5 algorithm: look up the stock, resolve base rate /
    /// volatility / event risk each with their own fallback ladder, apply
    /// the adjustment formula, floor at `min_borrow_rate`, cache the result.
    pub async fn adjusted_rate(&self, ticker: &str) -> Result<AdjustedRate, ApiError> {
        let stock = self.repo.get_stock(ticker).await.map_err(|e| match e {
            RepositoryError::NotFound => ApiError::TickerNotFound { ticker: ticker.to_string() },
            RepositoryError::Storage(message) => ApiError::ExternalApiUnavailable { message },
        })?;

        let (base_rate, borrow_rate_source) = self.resolve_base_rate(ticker, &stock).await?;
        let (vol_index, volatility_source) = self.resolve_volatility(ticker).await;
        let (event_risk, event_risk_source) = self.resolve_event_risk(ticker).await;

        let adjusted = self.apply_adjustment(base_rate, vol_index, event_risk)?;
        // `borrow_rate_used` is reported and fed into the fee engine at the
        // same 4dp granularity (§8 S1: the daily-rate example divides the
        // already-rounded 0.0598, not the raw 0.05975 adjustment).
        let rounded = quantize(adjusted, 4);
        let floored = rounded.max(stock.min_borrow_rate);

        self.cache
            .put(Namespace::BorrowRate, ticker, floored, self.config.cache_ttls.borrow_rate_l1, self.config.cache_ttls.borrow_rate_l2)
            .await;

        Ok(AdjustedRate {
            rate: floored,
            vol_index,
            event_risk,
            borrow_rate_source,
            volatility_source,
            event_risk_source,
        })
    }

    async fn resolve_base_rate(&self, ticker: &str, stock: &Stock) -> Result<(Decimal, DataSource), ApiError> {
        match self.seclend.fetch_rate(ticker).await {
            Ok(quote) => {
                // Status-based override: SecLend's view of borrow status wins
                // over the stored record when they disagree (§4.5 edge
                // policies), but it never writes back to the stocks table
                // from the hot path.
                if let Some(BorrowStatus::Hard) = quote.status {
                    if stock.borrow_status != BorrowStatus::Hard {
                        warn!(ticker, "seclend reports HARD status, stored record disagrees");
                    }
                }
                Ok((quote.rate, DataSource::Api))
            }
            Err(e) => {
                warn!(ticker, error = %e, "seclend call failed, falling back");
                if let Some(cached) = self
                    .cache
                    .peek::<Decimal>(Namespace::BorrowRate, ticker)
                    .await
                {
                    if cached.age <= self.config.cache_ttls.borrow_rate_l2 * self.config.fallback_cache_age_multiplier {
                        return Ok((cached.value, DataSource::Cache));
                    }
                }
                Ok((stock.min_borrow_rate, DataSource::StoredMinimum))
            }
        }
    }

    async fn resolve_volatility(&self, ticker: &str) -> (Decimal, DataSource) {
        match self.volatility.fetch_index(ticker).await {
            Ok(value) => {
                self.cache
                    .put(Namespace::Volatility, ticker, value, self.config.cache_ttls.volatility_l1, self.config.cache_ttls.volatility_l2)
                    .await;
                (value, DataSource::Api)
            }
            Err(e) => {
                warn!(ticker, error = %e, "volatility call failed, falling back");
                if let Some(cached) = self.cache.peek::<Decimal>(Namespace::Volatility, ticker).await {
                    if cached.age <= self.config.cache_ttls.volatility_l2 * self.config.fallback_cache_age_multiplier {
                        return (cached.value, DataSource::Cache);
                    }
                }
                (self.config.default_volatility_index, DataSource::Default)
            }
        }
    }

    async fn resolve_event_risk(&self, ticker: &str) -> (i32, DataSource) {
        match self.events.fetch_event_risk(ticker).await {
            Ok(value) => {
                self.cache
                    .put(Namespace::EventRisk, ticker, value, self.config.cache_ttls.event_risk_l1, self.config.cache_ttls.event_risk_l2)
                    .await;
                (value.clamp(0, 10), DataSource::Api)
            }
            Err(e) => {
                warn!(ticker, error = %e, "events call failed, falling back");
                if let Some(cached) = self.cache.peek::<i32>(Namespace::EventRisk, ticker).await {
                    if cached.age <= self.config.cache_ttls.event_risk_l2 * self.config.fallback_cache_age_multiplier {
                        return (cached.value.clamp(0, 10), DataSource::Cache);
                    }
                }
                (0, DataSource::Default)
            }
        }
    }

    /// `adjusted = base_rate * (1 + v * Vf + (e / 10) * Ef)` (§4.1, §4.5
    /// step 6). Pure and non-suspending, per §5's "pure math must not
    /// suspend" contract.
    fn apply_adjustment(&self, base_rate: Decimal, vol_index: Decimal, event_risk: i32) -> Result<Decimal, ArithmeticError> {
        let vol_term = checked_mul(vol_index, self.config.volatility_factor)?;
        let event_fraction = Decimal::from(event_risk) / Decimal::from(10);
        let event_term = checked_mul(event_fraction, self.config.event_risk_factor_mult)?;
        let multiplier = checked_add(checked_add(Decimal::ONE, vol_term)?, event_term)?;
        let adjusted = checked_mul(base_rate, multiplier)?;
        Ok(quantize(adjusted, 8))
    }

    /// Whether at least one upstream breaker is not permanently tripped
    /// (§6.1's health-readiness criterion).
    pub fn any_breaker_closed(&self) -> bool {
        use crate::upstream::breaker::CircuitState;
        [
            self.seclend.breaker_state(),
            self.volatility.breaker_state(),
            self.events.breaker_state(),
        ]
        .iter()
        .any(|s| *s != CircuitState::Open)
    }
}

/// Daily rate derived from an annual rate, shared between the rate and fee
/// engines (§4.6: `daily_rate = annual_rate / DAYS_IN_YEAR`).
pub fn daily_rate(annual_rate: Decimal, days_in_year: Decimal) -> Result<Decimal, ArithmeticError> {
    checked_div(annual_rate, days_in_year)
}
