//! Error taxonomy (§7). Machine codes are stable and part of the public
//! contract; the `IntoResponse` impl is the only place that shapes the wire
//! body, so no handler can accidentally leak internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::ArithmeticError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid parameter: {field}")]
    InvalidParameter { field: String, message: String },

    #[error("unauthorized")]
    Unauthorized { message: String },

    #[error("ticker not found")]
    TickerNotFound { ticker: String },

    #[error("client not found")]
    ClientNotFound { client_id: String },

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("external api unavailable")]
    ExternalApiUnavailable { message: String },

    #[error("calculation error")]
    CalculationError {
        correlation_id: Uuid,
        message: String,
    },

    #[error("internal error")]
    Internal {
        correlation_id: Uuid,
        message: String,
    },
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::TickerNotFound { .. } => "TICKER_NOT_FOUND",
            Self::ClientNotFound { .. } => "CLIENT_NOT_FOUND",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::ExternalApiUnavailable { .. } => "EXTERNAL_API_UNAVAILABLE",
            Self::CalculationError { .. } => "CALCULATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::TickerNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ClientNotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ExternalApiUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::CalculationError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::InvalidParameter { message, .. } => message.clone(),
            Self::Unauthorized { message } => message.clone(),
            Self::TickerNotFound { ticker } => format!("ticker '{ticker}' not found"),
            Self::ClientNotFound { client_id } => format!("client '{client_id}' not found"),
            Self::RateLimitExceeded { .. } => "rate limit exceeded".to_string(),
            Self::ExternalApiUnavailable { message } => message.clone(),
            // Internals never leak: the correlation id is the only detail surfaced.
            Self::CalculationError { correlation_id, .. } => {
                format!("calculation failed (correlation_id={correlation_id})")
            }
            Self::Internal { correlation_id, .. } => {
                format!("internal error (correlation_id={correlation_id})")
            }
        }
    }

    fn details(&self) -> Value {
        match self {
            Self::InvalidParameter { field, .. } => json!({ "field": field }),
            _ => json!({}),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
    error_code: &'static str,
    details: Value,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::CalculationError { correlation_id, message } => {
                tracing::error!(%correlation_id, message, "calculation error");
            }
            Self::Internal { correlation_id, message } => {
                tracing::error!(%correlation_id, message, "internal error");
            }
            _ => {}
        }

        let status = self.status();
        let body = ErrorBody {
            status: "error",
            error: self.public_message(),
            error_code: self.code(),
            details: self.details(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimitExceeded { retry_after_secs } = &self {
            response
                .headers_mut()
                .insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
        }
        response
    }
}

impl From<ArithmeticError> for ApiError {
    fn from(e: ArithmeticError) -> Self {
        Self::CalculationError {
            correlation_id: Uuid::new_v4(),
            message: e.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
