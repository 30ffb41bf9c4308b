//! `GET /api/v1/rates/{ticker}` (§4.10, §6.1): the current adjusted rate for
//! a ticker, computed through the same rate engine path `calculate-locate`
//! uses so the two stay consistent within a cache TTL window (§8's
//! "rate lookup ... and the `borrow_rate_used` ... match").

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::api::dto::RatesResponse;
use crate::error::{ApiError, ApiResult};
use crate::repository::RepositoryError;
use crate::state::AppState;

pub async fn get_rate(State(state): State<Arc<AppState>>, Path(ticker): Path<String>) -> ApiResult<Json<RatesResponse>> {
    let ticker = ticker.to_ascii_uppercase();

    let stock = state.repo.get_stock(&ticker).await.map_err(|e| match e {
        RepositoryError::NotFound => ApiError::TickerNotFound { ticker: ticker.clone() },
        RepositoryError::Storage(message) => ApiError::ExternalApiUnavailable { message },
    })?;

    let adjusted = state.rate_engine.adjusted_rate(&ticker).await?;

    Ok(Json(RatesResponse::new(&stock, &adjusted)))
}
