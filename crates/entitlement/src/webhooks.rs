//! Payment webhook ingestion
//!
//! Verifies and decodes inbound payment-completion events and applies the
//! resulting credit grant to the ledger exactly once, regardless of how many
//! times the provider delivers the event.
//!
//! Signature scheme: the provider signs `"{timestamp}.{payload}"` with
//! HMAC-SHA256 and sends `t=<unix>,v1=<hex>` in the signature header.
//! Timestamps older than five minutes are rejected.
//!
//! Atomicity: claiming the event id and mutating the ledger happen in one
//! transaction. A store failure rolls back the whole unit and surfaces as a
//! transient error, so the provider's redelivery gets a clean retry; a
//! successful commit makes every future delivery of the same id a no-op
//! that returns the stored outcome.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;

use lotlens_shared::Identity;

use crate::error::{EntitlementError, EntitlementResult};
use crate::events::{self, EventStore, ProcessedEvent};
use crate::ledger;
use crate::plans::PlanKind;

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamp tolerance (5 minutes).
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Event type that carries a credit grant. Everything else is acknowledged
/// and recorded as ignored.
const PAYMENT_COMPLETED: &str = "payment.completed";

/// Payment provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub webhook_secret: String,
}

impl ProviderConfig {
    /// Read `PAYMENT_WEBHOOK_SECRET` from the environment.
    pub fn from_env() -> EntitlementResult<Self> {
        let webhook_secret = std::env::var("PAYMENT_WEBHOOK_SECRET")
            .map_err(|_| EntitlementError::Config("PAYMENT_WEBHOOK_SECRET not set".to_string()))?;

        if webhook_secret.is_empty() {
            return Err(EntitlementError::Config(
                "PAYMENT_WEBHOOK_SECRET is empty".to_string(),
            ));
        }

        Ok(Self { webhook_secret })
    }
}

/// Raw provider event envelope as delivered on the wire.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: EventData,
}

#[derive(Debug, Default, Deserialize)]
struct EventData {
    customer_email: Option<String>,
    plan: Option<String>,
    amount_cents: Option<i64>,
    currency: Option<String>,
}

/// A normalized, verified payment-completion event.
#[derive(Debug, Clone)]
pub struct PaymentCompleted {
    pub provider_event_id: String,
    pub identity: Identity,
    pub plan_kind: PlanKind,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Result of ingesting one webhook delivery. All variants are acknowledged
/// with a 2xx; fatal decode failures before an event id is known surface as
/// errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First processing: grant applied to the ledger.
    Applied {
        plan_kind: PlanKind,
        credits_granted: i32,
    },
    /// Replay: the stored outcome of the first processing, unchanged.
    AlreadyProcessed { outcome: String },
    /// Recorded but not applied (missing fields or unknown plan). Recording
    /// the rejection keeps provider redeliveries from becoming retry storms.
    Rejected { outcome: String },
    /// Event type we don't handle; recorded and acknowledged.
    Ignored { event_type: String },
}

impl IngestOutcome {
    /// Outcome string as stored in `processed_events.outcome`.
    pub fn as_stored(&self) -> &str {
        match self {
            IngestOutcome::Applied { .. } => outcomes::APPLIED,
            IngestOutcome::AlreadyProcessed { outcome } => outcome,
            IngestOutcome::Rejected { outcome } => outcome,
            IngestOutcome::Ignored { .. } => outcomes::IGNORED,
        }
    }
}

/// Stored outcome strings.
pub mod outcomes {
    pub const APPLIED: &str = "applied";
    pub const IGNORED: &str = "ignored";
    pub const REJECTED_MALFORMED: &str = "rejected_malformed";
    pub const REJECTED_UNKNOWN_PLAN: &str = "rejected_unknown_plan";
}

/// Verifies and applies payment webhooks.
#[derive(Clone)]
pub struct WebhookIngestor {
    config: ProviderConfig,
    pool: PgPool,
    store: EventStore,
}

impl WebhookIngestor {
    pub fn new(config: ProviderConfig, pool: PgPool) -> Self {
        let store = EventStore::new(pool.clone());
        Self {
            config,
            pool,
            store,
        }
    }

    /// Verify, decode, and apply one webhook delivery.
    pub async fn ingest(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> EntitlementResult<IngestOutcome> {
        let payload = std::str::from_utf8(payload)
            .map_err(|_| EntitlementError::MalformedEvent("payload is not UTF-8".to_string()))?;

        self.verify_signature(payload, signature_header)?;

        let envelope: EventEnvelope = serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(error = %e, "Webhook payload failed to decode");
            EntitlementError::MalformedEvent(e.to_string())
        })?;

        if envelope.id.is_empty() {
            return Err(EntitlementError::MalformedEvent(
                "event id is empty".to_string(),
            ));
        }

        if envelope.kind != PAYMENT_COMPLETED {
            tracing::info!(
                event_id = %envelope.id,
                event_type = %envelope.kind,
                "Unhandled provider event type - recording and acknowledging"
            );
            return self
                .record_without_grant(&envelope.id, outcomes::IGNORED, || IngestOutcome::Ignored {
                    event_type: envelope.kind.clone(),
                })
                .await;
        }

        match Self::normalize(&envelope) {
            Ok(event) => self.apply(event).await,
            Err(EntitlementError::MalformedEvent(reason)) => {
                tracing::warn!(event_id = %envelope.id, reason = %reason, "Payment event missing required fields");
                self.record_without_grant(&envelope.id, outcomes::REJECTED_MALFORMED, || {
                    IngestOutcome::Rejected {
                        outcome: outcomes::REJECTED_MALFORMED.to_string(),
                    }
                })
                .await
            }
            Err(EntitlementError::UnknownPlan(plan)) => {
                tracing::warn!(event_id = %envelope.id, plan = %plan, "Payment event carries unknown plan");
                self.record_without_grant(&envelope.id, outcomes::REJECTED_UNKNOWN_PLAN, || {
                    IngestOutcome::Rejected {
                        outcome: outcomes::REJECTED_UNKNOWN_PLAN.to_string(),
                    }
                })
                .await
            }
            Err(other) => Err(other),
        }
    }

    /// Verify the `t=<unix>,v1=<hex>` signature header against the payload.
    pub fn verify_signature(&self, payload: &str, signature_header: &str) -> EntitlementResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature_header.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in signature header");
            EntitlementError::InvalidSignature
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Missing v1 signature in signature header");
            EntitlementError::InvalidSignature
        })?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| EntitlementError::InvalidSignature)?
            .as_secs() as i64;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(EntitlementError::InvalidSignature);
        }

        let expected = hex::decode(&v1_signature).map_err(|_| {
            tracing::warn!("Webhook signature is not valid hex");
            EntitlementError::InvalidSignature
        })?;

        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| EntitlementError::InvalidSignature)?;
        mac.update(signed_payload.as_bytes());

        // Constant-time comparison.
        mac.verify_slice(&expected).map_err(|_| {
            tracing::warn!("Webhook signature mismatch");
            EntitlementError::InvalidSignature
        })?;

        Ok(())
    }

    /// Normalize a decoded envelope into a `PaymentCompleted`.
    fn normalize(envelope: &EventEnvelope) -> EntitlementResult<PaymentCompleted> {
        let email = envelope
            .data
            .customer_email
            .as_deref()
            .ok_or_else(|| EntitlementError::MalformedEvent("missing customer_email".to_string()))?;

        let identity = Identity::normalize(email);
        if identity.is_empty() {
            return Err(EntitlementError::MalformedEvent(
                "customer_email is empty".to_string(),
            ));
        }

        let plan = envelope
            .data
            .plan
            .as_deref()
            .ok_or_else(|| EntitlementError::MalformedEvent("missing plan".to_string()))?;
        let plan_kind: PlanKind = plan.parse()?;

        Ok(PaymentCompleted {
            provider_event_id: envelope.id.clone(),
            identity,
            plan_kind,
            amount_cents: envelope.data.amount_cents,
            currency: envelope.data.currency.clone(),
        })
    }

    /// Apply a normalized payment event: claim + grant + audit, atomically.
    async fn apply(&self, event: PaymentCompleted) -> EntitlementResult<IngestOutcome> {
        let credits = event.plan_kind.credits_granted();
        let mut tx = self.pool.begin().await?;

        let claimed =
            events::claim_in_tx(&mut tx, &event.provider_event_id, outcomes::APPLIED).await?;
        if !claimed {
            tx.rollback().await?;
            return self.replay(&event.provider_event_id).await;
        }

        let batch_id = ledger::grant_in_tx(&mut tx, &event.identity, event.plan_kind, credits).await?;
        events::record_audit_in_tx(
            &mut tx,
            &event.provider_event_id,
            &event.identity,
            event.plan_kind,
            event.amount_cents,
            event.currency.as_deref(),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            event_id = %event.provider_event_id,
            identity = %event.identity,
            plan = %event.plan_kind,
            credits = credits,
            batch_id = %batch_id,
            "Payment event applied to ledger"
        );

        Ok(IngestOutcome::Applied {
            plan_kind: event.plan_kind,
            credits_granted: credits,
        })
    }

    /// Record a non-grant outcome for a first delivery, or replay the stored
    /// one. Recording inside a transaction keeps the claim semantics uniform
    /// with the grant path.
    async fn record_without_grant(
        &self,
        event_id: &str,
        outcome: &str,
        build: impl FnOnce() -> IngestOutcome,
    ) -> EntitlementResult<IngestOutcome> {
        let mut tx = self.pool.begin().await?;
        let claimed = events::claim_in_tx(&mut tx, event_id, outcome).await?;
        if !claimed {
            tx.rollback().await?;
            return self.replay(event_id).await;
        }
        tx.commit().await?;

        Ok(build())
    }

    /// Fetch the stored outcome for a redelivered event.
    async fn replay(&self, event_id: &str) -> EntitlementResult<IngestOutcome> {
        let stored = self.store.find(event_id).await?;
        let replayed = Self::replayed_outcome(stored)?;
        if let IngestOutcome::AlreadyProcessed { outcome } = &replayed {
            tracing::info!(event_id = %event_id, outcome = %outcome, "Duplicate webhook delivery - replaying stored outcome");
        }
        Ok(replayed)
    }

    /// Map the stored row for a conflicted claim to the replay outcome.
    ///
    /// A missing row here means the first delivery's transaction has not
    /// committed yet; that is a transient state, so the error path lets the
    /// provider redeliver rather than acknowledging an outcome we cannot
    /// know yet.
    fn replayed_outcome(stored: Option<ProcessedEvent>) -> EntitlementResult<IngestOutcome> {
        match stored {
            Some(event) => Ok(IngestOutcome::AlreadyProcessed {
                outcome: event.outcome,
            }),
            None => Err(EntitlementError::Database(sqlx::Error::RowNotFound)),
        }
    }
}
