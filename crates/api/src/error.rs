//! API error type and HTTP status mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lotlens_entitlement::EntitlementError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            // Out of both credits and demo quota: payment required, with
            // enough state for the client to render an upgrade prompt.
            ApiError::Entitlement(EntitlementError::QuotaExceeded { used, limit }) => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": "quota_exceeded",
                    "message": self.to_string(),
                    "used": used,
                    "limit": limit,
                }),
            ),
            ApiError::Entitlement(EntitlementError::InvalidSignature)
            | ApiError::Entitlement(EntitlementError::MalformedEvent(_))
            | ApiError::Entitlement(EntitlementError::UnknownPlan(_)) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_request", "message": self.to_string() }),
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_request", "message": message }),
            ),
            ApiError::Entitlement(EntitlementError::Database(e)) => {
                tracing::error!(error = ?e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal", "message": "internal server error" }),
                )
            }
            ApiError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal", "message": "internal server error" }),
                )
            }
            ApiError::Entitlement(EntitlementError::Config(_)) | ApiError::Internal(_) => {
                tracing::error!(error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal", "message": "internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_402() {
        let response =
            ApiError::Entitlement(EntitlementError::QuotaExceeded { used: 3, limit: 3 })
                .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn invalid_signature_maps_to_400() {
        let response =
            ApiError::Entitlement(EntitlementError::InvalidSignature).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn database_errors_map_to_500() {
        let response = ApiError::Database(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
