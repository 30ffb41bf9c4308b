//! `POST|GET /api/v1/calculate-locate` (§4.10, §6.1): validate → dispatch to
//! the rate and fee engines → shape the response → enqueue an audit record.
//! Idempotency-Key support (§8) short-circuits the whole pipeline on a
//! within-TTL replay so a retried POST never produces a second audit record.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::api::dto::{CalculateRequest, CalculateResponse};
use crate::auth::AuthContext;
use crate::cache::{key, Namespace};
use crate::engine::fee::calculate_fee;
use crate::error::{ApiError, ApiResult};
use crate::models::AuditRecord;
use crate::repository::RepositoryError;
use crate::state::AppState;
use crate::validation::{validate, LocateRequestFields};

pub async fn calculate_post(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<CalculateRequest>,
) -> ApiResult<Json<CalculateResponse>> {
    handle(state, auth, headers, req).await
}

pub async fn calculate_get(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Query(req): Query<CalculateRequest>,
) -> ApiResult<Json<CalculateResponse>> {
    handle(state, auth, headers, req).await
}

async fn handle(
    state: Arc<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    req: CalculateRequest,
) -> ApiResult<Json<CalculateResponse>> {
    let deadline = state.config.request_deadline;
    match tokio::time::timeout(deadline, run(&state, &auth, &headers, req)).await {
        Ok(result) => result.map(Json),
        Err(_elapsed) => Err(ApiError::ExternalApiUnavailable {
            message: "request deadline exceeded".to_string(),
        }),
    }
}

async fn run(
    state: &Arc<AppState>,
    auth: &AuthContext,
    headers: &HeaderMap,
    req: CalculateRequest,
) -> ApiResult<CalculateResponse> {
    let fields = LocateRequestFields {
        ticker: &req.ticker,
        position_value: req.position_value,
        loan_days: req.loan_days,
        client_id: &req.client_id,
    };
    let ticker = validate(&fields)?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let broker = state.repo.get_broker(&auth.client_id).await.map_err(|e| match e {
        RepositoryError::NotFound => ApiError::ClientNotFound { client_id: auth.client_id.clone() },
        RepositoryError::Storage(message) => ApiError::ExternalApiUnavailable { message },
    })?;

    // An explicit Idempotency-Key pins the cache entry to that header so a
    // retried POST always replays, even if the client sent different
    // numbers the second time. Without one, the request's own shape is the
    // key, so back-to-back identical calls still share a cache hit.
    let cache_key = match &idempotency_key {
        Some(idem) => format!("{}:idem:{}", auth.client_id, idem),
        None => format!(
            "{}:{}",
            auth.client_id,
            key::locate_fee_key(
                &ticker,
                req.position_value,
                req.loan_days,
                broker.markup_percentage,
                &format!("{:?}", broker.transaction_fee_type),
                broker.transaction_amount,
            )
        ),
    };

    if let Some(cached) = state.cache.peek::<CalculateResponse>(Namespace::LocateFee, &cache_key).await {
        return Ok(cached.value);
    }

    let adjusted = state.rate_engine.adjusted_rate(&ticker).await?;
    let fee = calculate_fee(req.position_value, req.loan_days, adjusted.rate, &broker)?;
    let response = CalculateResponse::new(&fee, adjusted.rate);

    state
        .cache
        .put(
            Namespace::LocateFee,
            &cache_key,
            response.clone(),
            state.config.cache_ttls.locate_fee_l2,
            state.config.cache_ttls.locate_fee_l2,
        )
        .await;

    let mut breakdown = HashMap::new();
    breakdown.insert("borrow_cost".to_string(), fee.borrow_cost);
    breakdown.insert("markup".to_string(), fee.markup);
    breakdown.insert("transaction_fees".to_string(), fee.transaction_fees);

    let record = AuditRecord {
        audit_id: Uuid::new_v4(),
        timestamp: state.clock.now(),
        client_id: auth.client_id.clone(),
        ticker: ticker.clone(),
        position_value: req.position_value,
        loan_days: req.loan_days,
        borrow_rate_used: adjusted.rate,
        total_fee: fee.total_fee,
        data_sources: adjusted.data_sources(),
        breakdown,
    };
    state.audit.enqueue(record).await;

    Ok(response)
}
