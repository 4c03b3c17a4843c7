//! Demo quota: free-tier usage counter
//!
//! Independent of the credit ledger. Paid consumption never touches it.
//! The increment is a single guarded upsert keyed on identity, so two
//! concurrent free requests can never both read count=2 and both write 3.

use sqlx::PgPool;

use lotlens_shared::Identity;

/// Hard cap on free analyses per identity.
pub const MAX_DEMO: i32 = 3;

/// Durable per-identity counter of free-tier usage.
#[derive(Clone)]
pub struct QuotaCounter {
    pool: PgPool,
}

impl QuotaCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current free-tier usage (0 when the identity has never used it).
    pub async fn current(&self, identity: &Identity) -> Result<i32, sqlx::Error> {
        let count: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT count FROM quota_counters WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.map(|(n,)| n).unwrap_or(0))
    }

    /// Atomically consume one free slot, creating the counter on first use.
    ///
    /// Returns the post-increment count, or `None` when the counter is
    /// already at `MAX_DEMO` (the guard in the upsert makes check-and-bump
    /// a single statement).
    pub async fn try_increment(&self, identity: &Identity) -> Result<Option<i32>, sqlx::Error> {
        let count: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO quota_counters (identity, count)
            VALUES ($1, 1)
            ON CONFLICT (identity) DO UPDATE
            SET count = quota_counters.count + 1
            WHERE quota_counters.count < $2
            RETURNING count
            "#,
        )
        .bind(identity)
        .bind(MAX_DEMO)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.map(|(n,)| n))
    }
}
