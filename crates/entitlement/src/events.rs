//! Event store: durable idempotency record for payment webhooks
//!
//! Every webhook delivery ends in exactly one of two states: a row in
//! `processed_events` (with the outcome of the first processing) or a
//! transient error that left nothing behind, permitting redelivery. The
//! primary key on `provider_event_id` is the idempotency guarantee; the
//! atomic claim uses INSERT .. ON CONFLICT DO NOTHING so two concurrent
//! deliveries of the same event cannot both pass an existence check.

use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;

use lotlens_shared::Identity;

use crate::plans::PlanKind;

/// A recorded webhook event and the outcome of its first processing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessedEvent {
    pub provider_event_id: String,
    pub outcome: String,
    pub processed_at: OffsetDateTime,
}

/// Read access to the processed-event record.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the stored outcome for a provider event id, if any.
    pub async fn find(&self, provider_event_id: &str) -> Result<Option<ProcessedEvent>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT provider_event_id, outcome, processed_at
            FROM processed_events
            WHERE provider_event_id = $1
            "#,
        )
        .bind(provider_event_id)
        .fetch_optional(&self.pool)
        .await
    }
}

/// Atomically claim an event id inside the caller's transaction.
///
/// Returns `true` if this call inserted the row (first delivery - the caller
/// now owns applying the grant) and `false` on conflict (already processed).
pub(crate) async fn claim_in_tx(
    conn: &mut PgConnection,
    provider_event_id: &str,
    outcome: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO processed_events (provider_event_id, outcome, processed_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (provider_event_id) DO NOTHING
        "#,
    )
    .bind(provider_event_id)
    .bind(outcome)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Write the reconciliation audit row for an applied payment event.
///
/// Separate from the ledger mutation; written unconditionally on first
/// processing so the provider's records can be reconciled later.
pub(crate) async fn record_audit_in_tx(
    conn: &mut PgConnection,
    provider_event_id: &str,
    identity: &Identity,
    plan_kind: PlanKind,
    amount_cents: Option<i64>,
    currency: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_audit
            (provider_event_id, identity, plan_kind, amount_cents, currency, recorded_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        "#,
    )
    .bind(provider_event_id)
    .bind(identity)
    .bind(plan_kind.as_str())
    .bind(amount_cents)
    .bind(currency)
    .execute(conn)
    .await?;

    Ok(())
}
