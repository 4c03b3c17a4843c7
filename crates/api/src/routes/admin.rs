//! Operator routes
//!
//! Invariant checks and unlimited-grant management. These sit behind the
//! deployment's network boundary; there is no end-user path to them.

use axum::extract::{Path, Query, State};
use axum::Json;
use lotlens_entitlement::{InvariantCheckSummary, InvariantChecker, InvariantViolation};
use lotlens_shared::Identity;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvariantQuery {
    /// Run a single named check instead of the full suite.
    pub check: Option<String>,
}

pub async fn run_invariant_checks(
    State(state): State<AppState>,
    Query(query): Query<InvariantQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    match query.check {
        Some(name) => {
            if !InvariantChecker::available_checks().contains(&name.as_str()) {
                return Err(ApiError::BadRequest(format!(
                    "unknown check '{}', available: {}",
                    name,
                    InvariantChecker::available_checks().join(", ")
                )));
            }
            let violations: Vec<InvariantViolation> =
                state.entitlement.invariants.run_check(&name).await?;
            Ok(Json(json!({ "check": name, "violations": violations })))
        }
        None => {
            let summary: InvariantCheckSummary =
                state.entitlement.invariants.run_all_checks().await?;
            Ok(Json(serde_json::to_value(summary).map_err(|e| {
                ApiError::Internal(anyhow::anyhow!("failed to serialize summary: {e}"))
            })?))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantUnlimitedRequest {
    pub identity: String,
    /// Omit for a grant with no expiry.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub valid_until: Option<OffsetDateTime>,
}

pub async fn grant_unlimited(
    State(state): State<AppState>,
    Json(request): Json<GrantUnlimitedRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let identity = Identity::normalize(&request.identity);
    if identity.is_empty() {
        return Err(ApiError::BadRequest("identity must not be empty".to_string()));
    }
    if let Some(until) = request.valid_until {
        if until <= OffsetDateTime::now_utc() {
            return Err(ApiError::BadRequest(
                "valid_until must be in the future".to_string(),
            ));
        }
    }

    state
        .entitlement
        .resolver
        .grant_unlimited(&identity, request.valid_until)
        .await?;

    Ok(Json(json!({
        "identity": identity,
        "unlimited": true,
        "valid_until": request.valid_until.map(|t| t.unix_timestamp()),
    })))
}

pub async fn revoke_unlimited(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let identity = Identity::normalize(&identity);
    if identity.is_empty() {
        return Err(ApiError::BadRequest("identity must not be empty".to_string()));
    }

    state.entitlement.resolver.revoke_unlimited(&identity).await?;

    Ok(Json(json!({ "identity": identity, "unlimited": false })))
}
