//! Analysis and entitlement routes

use axum::extract::{Path, State};
use axum::Json;
use lotlens_entitlement::EntitlementState;
use lotlens_shared::Identity;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::gateway::{AnalysisGateway, AnalysisRecord};
use crate::state::AppState;

/// Listing text is capped well above any real listing; oversized bodies are
/// rejected before any entitlement is charged.
const MAX_LISTING_CHARS: usize = 50_000;

#[derive(Debug, Deserialize)]
pub struct CreateAnalysisRequest {
    pub email: String,
    pub listing_text: String,
}

pub async fn create_analysis(
    State(state): State<AppState>,
    Json(request): Json<CreateAnalysisRequest>,
) -> ApiResult<Json<AnalysisRecord>> {
    let identity = Identity::normalize(&request.email);
    if identity.is_empty() {
        return Err(ApiError::BadRequest("email must not be empty".to_string()));
    }

    let listing_text = request.listing_text.trim();
    if listing_text.is_empty() {
        return Err(ApiError::BadRequest(
            "listing_text must not be empty".to_string(),
        ));
    }
    if listing_text.chars().count() > MAX_LISTING_CHARS {
        return Err(ApiError::BadRequest(format!(
            "listing_text exceeds {} characters",
            MAX_LISTING_CHARS
        )));
    }

    let gateway = AnalysisGateway::new(
        state.pool.clone(),
        state.entitlement.clone(),
        state.pipeline.clone(),
    );

    let record = gateway.analyze(&identity, listing_text).await?;
    Ok(Json(record))
}

pub async fn get_entitlement(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<EntitlementState>> {
    let identity = Identity::normalize(&identity);
    if identity.is_empty() {
        return Err(ApiError::BadRequest("identity must not be empty".to_string()));
    }

    let entitlement = state.entitlement.resolver.state_for(&identity).await?;
    Ok(Json(entitlement))
}
