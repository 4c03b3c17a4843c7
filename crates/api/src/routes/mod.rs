//! Route definitions

pub mod admin;
pub mod analyses;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payment", post(webhooks::payment_webhook))
        .route("/api/analyses", post(analyses::create_analysis))
        .route(
            "/api/entitlements/{identity}",
            get(analyses::get_entitlement),
        )
        .route("/api/admin/invariants", get(admin::run_invariant_checks))
        .route("/api/admin/unlimited", post(admin::grant_unlimited))
        .route(
            "/api/admin/unlimited/{identity}",
            axum::routing::delete(admin::revoke_unlimited),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
