//! API-key authentication + token-bucket throttling middleware (C8),
//! mirroring the reference backend's `auth_middleware` shape (extract →
//! validate → stash in request extensions → call `next`) but keyed on an
//! opaque bearer token and a repository lookup instead of a JWT.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::error::ApiError;
use crate::repository::RepositoryError;
use crate::state::AppState;

use super::apikey::hash_key;

/// Stashed in request extensions so handlers can read the authenticated
/// client without re-deriving it from the header.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub client_id: String,
}

pub async fn authenticate_and_throttle(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized { message: "missing X-API-Key header".to_string() })?;

    let key_hash = hash_key(&api_key);
    let record = state.repo.get_api_key(&key_hash).await.map_err(|e| match e {
        RepositoryError::NotFound => ApiError::Unauthorized { message: "invalid API key".to_string() },
        RepositoryError::Storage(message) => ApiError::ExternalApiUnavailable { message },
    })?;

    if let Some(expires_at) = record.expires_at {
        if expires_at <= state.clock.now() {
            return Err(ApiError::Unauthorized { message: "API key expired".to_string() });
        }
    }

    let decision = state
        .rate_limiter
        .check(&record.client_id, record.rate_limit)
        .await
        .map_err(|e| ApiError::Internal { correlation_id: Uuid::new_v4(), message: e.to_string() })?;

    if !decision.allowed {
        return Err(ApiError::RateLimitExceeded { retry_after_secs: decision.reset_secs });
    }

    req.extensions_mut().insert(AuthContext { client_id: record.client_id });

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", decision.limit.into());
    headers.insert("X-RateLimit-Remaining", decision.remaining.into());
    headers.insert("X-RateLimit-Reset", decision.reset_secs.into());
    Ok(response)
}
