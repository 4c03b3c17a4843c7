//! Credit ledger: purchased credit batches
//!
//! One batch per (identity, plan_kind); the grant path is a single atomic
//! upsert and the consumption path is a single conditional decrement, so
//! correctness never depends on in-process locking. Batches are never
//! deleted - a batch at zero is inert but retained for audit.

use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use lotlens_shared::Identity;

use crate::plans::PlanKind;

/// A purchased block of analysis credits.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CreditBatch {
    pub batch_id: Uuid,
    pub identity: Identity,
    pub plan_kind: String,
    pub credits_remaining: i32,
    pub acquired_at: OffsetDateTime,
}

/// Durable per-identity record of credit batches.
#[derive(Clone)]
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Batches with credits remaining, oldest acquisition first.
    ///
    /// The ordering here is the FIFO consumption contract: the tie-break on
    /// batch_id makes the order total so concurrent resolvers converge on
    /// the same batch.
    pub async fn open_batches(&self, identity: &Identity) -> Result<Vec<CreditBatch>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT batch_id, identity, plan_kind, credits_remaining, acquired_at
            FROM credit_batches
            WHERE identity = $1 AND credits_remaining > 0
            ORDER BY acquired_at ASC, batch_id ASC
            "#,
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await
    }

    /// Conditionally consume one credit from a specific batch.
    ///
    /// Returns the post-decrement remainder, or `None` when the batch was
    /// drained by a concurrent request between the caller's read and this
    /// write (the caller re-selects and retries, bounded).
    pub async fn try_decrement(&self, batch_id: Uuid) -> Result<Option<i32>, sqlx::Error> {
        let remaining: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE credit_batches
            SET credits_remaining = credits_remaining - 1
            WHERE batch_id = $1 AND credits_remaining > 0
            RETURNING credits_remaining
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining.map(|(n,)| n))
    }

    /// Sum of credits remaining across all batches for an identity.
    pub async fn total_remaining(&self, identity: &Identity) -> Result<i64, sqlx::Error> {
        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(credits_remaining), 0)::BIGINT
            FROM credit_batches
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

/// Apply a verified grant inside the caller's transaction.
///
/// First purchase of a plan creates the batch; repeat purchases increment
/// the existing one. `acquired_at` keeps its original value on increment so
/// consumption order stays FIFO by first acquisition.
pub(crate) async fn grant_in_tx(
    conn: &mut PgConnection,
    identity: &Identity,
    plan_kind: PlanKind,
    credits: i32,
) -> Result<Uuid, sqlx::Error> {
    let (batch_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO credit_batches (identity, plan_kind, credits_remaining, acquired_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (identity, plan_kind) DO UPDATE
        SET credits_remaining = credit_batches.credits_remaining + EXCLUDED.credits_remaining
        RETURNING batch_id
        "#,
    )
    .bind(identity)
    .bind(plan_kind.as_str())
    .bind(credits)
    .fetch_one(conn)
    .await?;

    Ok(batch_id)
}
