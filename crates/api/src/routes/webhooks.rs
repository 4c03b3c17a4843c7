//! Payment webhook route
//!
//! Status contract with the provider: 2xx acknowledges a delivery and stops
//! redelivery, so everything we have durably recorded (applied, replayed,
//! rejected, ignored) returns 200. A 400 means the request never carried a
//! verifiable event (bad signature, not UTF-8, undecodable JSON) and a 5xx
//! means we failed to record it; the provider redelivers both.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use lotlens_entitlement::IngestOutcome;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-payment-signature";

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::BadRequest(format!("missing {} header", SIGNATURE_HEADER))
        })?;

    let outcome = state.entitlement.webhooks.ingest(&body, signature).await?;

    Ok(Json(ack_body(&outcome)))
}

/// Acknowledgement body for a processed delivery.
///
/// Built from the stored outcome string alone, so a redelivered event gets a
/// byte-identical acknowledgement to its first delivery. Grant details are
/// in the logs and the audit table, not the ack.
fn ack_body(outcome: &IngestOutcome) -> serde_json::Value {
    json!({ "received": true, "outcome": outcome.as_stored() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotlens_entitlement::PlanKind;

    #[test]
    fn replayed_delivery_acks_identically_to_first() {
        let first = IngestOutcome::Applied {
            plan_kind: PlanKind::Pack5,
            credits_granted: 5,
        };
        let replay = IngestOutcome::AlreadyProcessed {
            outcome: "applied".to_string(),
        };
        assert_eq!(ack_body(&first), ack_body(&replay));
    }

    #[test]
    fn rejected_delivery_acks_identically_on_replay() {
        let first = IngestOutcome::Rejected {
            outcome: "rejected_unknown_plan".to_string(),
        };
        let replay = IngestOutcome::AlreadyProcessed {
            outcome: "rejected_unknown_plan".to_string(),
        };
        assert_eq!(ack_body(&first), ack_body(&replay));
        assert_eq!(
            ack_body(&first),
            json!({ "received": true, "outcome": "rejected_unknown_plan" })
        );
    }
}
