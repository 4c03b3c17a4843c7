//! Entitlement resolver
//!
//! Decides the consumption source for an analysis request and applies the
//! state transition. Decision order, first match wins:
//!
//! 1. allow-listed bypass identity (operator override, configuration)
//! 2. active, unexpired unlimited grant - no mutation at all
//! 3. paid credit - oldest open batch, FIFO, conditional decrement
//! 4. demo quota - guarded atomic increment up to [`MAX_DEMO`]
//! 5. denied - `QuotaExceeded` with current count and limit
//!
//! The ordering logic lives in a pure [`decide`] over a snapshot; the async
//! shell re-reads and retries (bounded) when a conditional write loses a
//! race, so two concurrent requests against one remaining credit resolve to
//! exactly one paid consumption and one fall-through.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use lotlens_shared::Identity;

use crate::error::{EntitlementError, EntitlementResult};
use crate::ledger::{CreditBatch, CreditLedger};
use crate::quota::{QuotaCounter, MAX_DEMO};

/// How often a lost conditional decrement is retried before falling through
/// to the demo quota.
const DECREMENT_ATTEMPTS: usize = 4;

/// The source an analysis request was charged against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ConsumptionSource {
    /// Unlimited plan or operator bypass; nothing was mutated.
    Unlimited,
    /// One credit consumed from the given batch.
    PaidCredit { batch_id: Uuid, remaining: i32 },
    /// One free slot consumed.
    DemoQuota { used: i32, limit: i32 },
}

/// Post-consumption entitlement state, returned for client display.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementState {
    pub unlimited: bool,
    pub credits_remaining: i64,
    pub demo_used: i32,
    pub demo_limit: i32,
}

/// An unlimited-plan flag with optional expiry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnlimitedGrant {
    pub identity: Identity,
    pub active: bool,
    pub valid_until: Option<OffsetDateTime>,
}

impl UnlimitedGrant {
    /// Active and not expired at `now`.
    pub fn is_effective(&self, now: OffsetDateTime) -> bool {
        self.active && self.valid_until.map(|until| until > now).unwrap_or(true)
    }
}

/// Resolver configuration.
///
/// The bypass allow-list is an operator override, deliberately sourced from
/// configuration rather than payment data.
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    pub bypass_identities: Vec<Identity>,
}

impl ResolverConfig {
    /// Read `UNLIMITED_BYPASS_EMAILS` (comma-separated; may be unset).
    pub fn from_env() -> Self {
        let bypass_identities = std::env::var("UNLIMITED_BYPASS_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(Identity::normalize)
            .filter(|id| !id.is_empty())
            .collect();

        Self { bypass_identities }
    }
}

/// Outcome of the pure decision step over a state snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Unlimited,
    PaidCredit(Uuid),
    DemoQuota,
    Denied { used: i32 },
}

/// Pick the consumption source for a snapshot of entitlement state.
///
/// Pure so the ordering contract (unlimited before paid before demo, FIFO
/// across batches) is testable without a store. `batches` need not be
/// pre-sorted; ties on `acquired_at` break on `batch_id` so the order is
/// total.
pub(crate) fn decide(
    bypassed: bool,
    grant: Option<&UnlimitedGrant>,
    now: OffsetDateTime,
    batches: &[CreditBatch],
    demo_used: i32,
) -> Decision {
    if bypassed {
        return Decision::Unlimited;
    }

    if grant.map(|g| g.is_effective(now)).unwrap_or(false) {
        return Decision::Unlimited;
    }

    let oldest_open = batches
        .iter()
        .filter(|b| b.credits_remaining > 0)
        .min_by_key(|b| (b.acquired_at, b.batch_id));
    if let Some(batch) = oldest_open {
        return Decision::PaidCredit(batch.batch_id);
    }

    if demo_used < MAX_DEMO {
        Decision::DemoQuota
    } else {
        Decision::Denied { used: demo_used }
    }
}

/// Resolves and charges entitlement for analysis requests.
#[derive(Clone)]
pub struct EntitlementResolver {
    pool: PgPool,
    ledger: CreditLedger,
    quota: QuotaCounter,
    config: ResolverConfig,
}

impl EntitlementResolver {
    pub fn new(pool: PgPool, config: ResolverConfig) -> Self {
        let ledger = CreditLedger::new(pool.clone());
        let quota = QuotaCounter::new(pool.clone());
        Self {
            pool,
            ledger,
            quota,
            config,
        }
    }

    /// Resolve the consumption source for `identity` and apply the charge.
    ///
    /// Callers invoke this exactly once per request, before paying the cost
    /// of the pipeline. The reservation is not rolled back if the pipeline
    /// later falls back (no-refund policy).
    pub async fn resolve_and_charge(
        &self,
        identity: &Identity,
    ) -> EntitlementResult<ConsumptionSource> {
        let bypassed = self.is_bypassed(identity);
        let now = OffsetDateTime::now_utc();

        // Snapshot, decide, apply with a conditional write; a lost write
        // means a concurrent request moved the state, so re-snapshot and
        // decide again (bounded).
        for attempt in 0..DECREMENT_ATTEMPTS {
            let grant = self.unlimited_grant(identity).await?;
            let batches = self.ledger.open_batches(identity).await?;
            let demo_used = self.quota.current(identity).await?;

            match decide(bypassed, grant.as_ref(), now, &batches, demo_used) {
                Decision::Unlimited => {
                    tracing::info!(identity = %identity, bypassed = bypassed, "Entitlement resolved as unlimited");
                    return Ok(ConsumptionSource::Unlimited);
                }
                Decision::PaidCredit(batch_id) => {
                    match self.ledger.try_decrement(batch_id).await? {
                        Some(remaining) => {
                            tracing::info!(
                                identity = %identity,
                                batch_id = %batch_id,
                                remaining = remaining,
                                "Credit consumed"
                            );
                            return Ok(ConsumptionSource::PaidCredit { batch_id, remaining });
                        }
                        None => {
                            tracing::debug!(
                                identity = %identity,
                                batch_id = %batch_id,
                                attempt = attempt,
                                "Batch drained concurrently, re-selecting"
                            );
                        }
                    }
                }
                Decision::DemoQuota => {
                    // Guarded upsert; None means concurrent free requests
                    // filled the counter between snapshot and write.
                    if let Some(used) = self.quota.try_increment(identity).await? {
                        tracing::info!(identity = %identity, used = used, limit = MAX_DEMO, "Demo slot consumed");
                        return Ok(ConsumptionSource::DemoQuota {
                            used,
                            limit: MAX_DEMO,
                        });
                    }
                }
                Decision::Denied { used } => {
                    tracing::info!(identity = %identity, used = used, limit = MAX_DEMO, "Entitlement denied");
                    return Err(EntitlementError::QuotaExceeded {
                        used,
                        limit: MAX_DEMO,
                    });
                }
            }
        }

        // Every attempt lost its conditional write; report the state as the
        // last snapshot saw it.
        let used = self.quota.current(identity).await?;
        Err(EntitlementError::QuotaExceeded {
            used,
            limit: MAX_DEMO,
        })
    }

    /// Current entitlement state for client display.
    pub async fn state_for(&self, identity: &Identity) -> EntitlementResult<EntitlementState> {
        let now = OffsetDateTime::now_utc();
        let unlimited = self.is_bypassed(identity)
            || self
                .unlimited_grant(identity)
                .await?
                .map(|g| g.is_effective(now))
                .unwrap_or(false);

        Ok(EntitlementState {
            unlimited,
            credits_remaining: self.ledger.total_remaining(identity).await?,
            demo_used: self.quota.current(identity).await?,
            demo_limit: MAX_DEMO,
        })
    }

    /// Issue (or refresh) an unlimited grant. Operator path, not derived
    /// from payment data.
    pub async fn grant_unlimited(
        &self,
        identity: &Identity,
        valid_until: Option<OffsetDateTime>,
    ) -> EntitlementResult<()> {
        sqlx::query(
            r#"
            INSERT INTO unlimited_grants (identity, active, valid_until)
            VALUES ($1, TRUE, $2)
            ON CONFLICT (identity) DO UPDATE
            SET active = TRUE, valid_until = EXCLUDED.valid_until
            "#,
        )
        .bind(identity)
        .bind(valid_until)
        .execute(&self.pool)
        .await?;

        tracing::info!(identity = %identity, valid_until = ?valid_until, "Unlimited grant issued");
        Ok(())
    }

    /// Deactivate an unlimited grant. The row is kept for audit.
    pub async fn revoke_unlimited(&self, identity: &Identity) -> EntitlementResult<()> {
        sqlx::query("UPDATE unlimited_grants SET active = FALSE WHERE identity = $1")
            .bind(identity)
            .execute(&self.pool)
            .await?;

        tracing::info!(identity = %identity, "Unlimited grant revoked");
        Ok(())
    }

    fn is_bypassed(&self, identity: &Identity) -> bool {
        self.config.bypass_identities.contains(identity)
    }

    async fn unlimited_grant(
        &self,
        identity: &Identity,
    ) -> Result<Option<UnlimitedGrant>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT identity, active, valid_until
            FROM unlimited_grants
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn batch(id: u128, remaining: i32, acquired_at: OffsetDateTime) -> CreditBatch {
        CreditBatch {
            batch_id: Uuid::from_u128(id),
            identity: Identity::normalize("buyer@example.com"),
            plan_kind: "pack5".to_string(),
            credits_remaining: remaining,
            acquired_at,
        }
    }

    fn grant(active: bool, valid_until: Option<OffsetDateTime>) -> UnlimitedGrant {
        UnlimitedGrant {
            identity: Identity::normalize("buyer@example.com"),
            active,
            valid_until,
        }
    }

    #[test]
    fn bypass_wins_over_everything() {
        let now = OffsetDateTime::now_utc();
        let decision = decide(true, None, now, &[batch(1, 5, now)], 3);
        assert_eq!(decision, Decision::Unlimited);
    }

    #[test]
    fn active_grant_without_expiry_is_unlimited() {
        let now = OffsetDateTime::now_utc();
        let g = grant(true, None);
        assert_eq!(decide(false, Some(&g), now, &[], 0), Decision::Unlimited);
    }

    #[test]
    fn expired_grant_falls_through_to_credits() {
        let now = OffsetDateTime::now_utc();
        let g = grant(true, Some(now - Duration::hours(1)));
        let decision = decide(false, Some(&g), now, &[batch(1, 2, now)], 0);
        assert_eq!(decision, Decision::PaidCredit(Uuid::from_u128(1)));
    }

    #[test]
    fn inactive_grant_is_ignored() {
        let now = OffsetDateTime::now_utc();
        let g = grant(false, None);
        assert_eq!(decide(false, Some(&g), now, &[], 0), Decision::DemoQuota);
    }

    #[test]
    fn fifo_prefers_oldest_batch() {
        let now = OffsetDateTime::now_utc();
        let older = batch(1, 1, now - Duration::days(7));
        let newer = batch(2, 5, now);
        // Order of the slice must not matter.
        let decision = decide(false, None, now, &[newer, older], 0);
        assert_eq!(decision, Decision::PaidCredit(Uuid::from_u128(1)));
    }

    #[test]
    fn exhausted_batches_are_skipped() {
        let now = OffsetDateTime::now_utc();
        let drained = batch(1, 0, now - Duration::days(7));
        let open = batch(2, 4, now);
        let decision = decide(false, None, now, &[drained, open], 0);
        assert_eq!(decision, Decision::PaidCredit(Uuid::from_u128(2)));
    }

    #[test]
    fn fifo_tie_breaks_on_batch_id() {
        let acquired = OffsetDateTime::now_utc();
        let a = batch(1, 1, acquired);
        let b = batch(2, 1, acquired);
        let decision = decide(false, None, acquired, &[b, a], 0);
        assert_eq!(decision, Decision::PaidCredit(Uuid::from_u128(1)));
    }

    #[test]
    fn no_credits_falls_to_demo_quota() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(decide(false, None, now, &[], 0), Decision::DemoQuota);
        assert_eq!(decide(false, None, now, &[], 2), Decision::DemoQuota);
    }

    #[test]
    fn at_demo_limit_is_denied_with_count() {
        let now = OffsetDateTime::now_utc();
        let decision = decide(false, None, now, &[], MAX_DEMO);
        assert_eq!(decision, Decision::Denied { used: 3 });
    }

    #[test]
    fn grant_effectiveness_windows() {
        let now = OffsetDateTime::now_utc();
        assert!(grant(true, None).is_effective(now));
        assert!(grant(true, Some(now + Duration::days(30))).is_effective(now));
        assert!(!grant(true, Some(now - Duration::seconds(1))).is_effective(now));
        assert!(!grant(false, Some(now + Duration::days(30))).is_effective(now));
    }

    mod config {
        use super::*;
        use serial_test::serial;

        #[test]
        #[serial]
        fn bypass_list_parses_and_normalizes() {
            std::env::set_var("UNLIMITED_BYPASS_EMAILS", " Ops@LotLens.dev ,qa@lotlens.dev,");
            let config = ResolverConfig::from_env();
            std::env::remove_var("UNLIMITED_BYPASS_EMAILS");

            assert_eq!(
                config.bypass_identities,
                vec![
                    Identity::normalize("ops@lotlens.dev"),
                    Identity::normalize("qa@lotlens.dev"),
                ]
            );
        }

        #[test]
        #[serial]
        fn missing_bypass_env_is_empty_list() {
            std::env::remove_var("UNLIMITED_BYPASS_EMAILS");
            assert!(ResolverConfig::from_env().bypass_identities.is_empty());
        }
    }
}
